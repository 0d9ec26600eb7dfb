use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::DeleteStrategy;
use crate::errors::{AppError, AppResult};
use crate::local_store::write_table;
use crate::records::{ApplicationTable, Column, NewApplication, RecordId};
use crate::settings::{SettingsPatch, SettingsStore};
use crate::sheets::RemoteTable;

pub trait TableObserver: Send + Sync {
    fn on_refresh(&self, table: &ApplicationTable);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PullOutcome {
    Disabled,
    Unchanged,
    Replaced { rows: usize },
    EmptyRemote,
    /// A local edit landed while the read was in flight.
    Superseded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
    Disabled,
    Pushed,
    Failed,
}

struct DriverState {
    table: ApplicationTable,
    revision: u64,
    sync_enabled: bool,
    // Revision whose table the sheet is known to hold. Row deletes are only
    // issued against that exact layout.
    sheet_revision: Option<u64>,
}

pub struct DriverOptions {
    pub data_file: PathBuf,
    pub sync_enabled: bool,
    pub delete_strategy: DeleteStrategy,
    pub settings: SettingsStore,
    pub remote: Option<Arc<dyn RemoteTable>>,
}

/// Owns the in-memory table. Local edits are written through to the file and,
/// when sync is on, pushed as a full overwrite. Pulls replace the table
/// wholesale when the sheet differs.
pub struct SyncDriver {
    state: Mutex<DriverState>,
    data_file: PathBuf,
    delete_strategy: DeleteStrategy,
    settings: SettingsStore,
    remote: RwLock<Option<Arc<dyn RemoteTable>>>,
    remote_guard: AsyncMutex<()>,
    observers: Mutex<Vec<Arc<dyn TableObserver>>>,
}

impl SyncDriver {
    pub fn new(options: DriverOptions, table: ApplicationTable) -> Self {
        Self {
            state: Mutex::new(DriverState {
                table,
                revision: 0,
                sync_enabled: options.sync_enabled,
                sheet_revision: None,
            }),
            data_file: options.data_file,
            delete_strategy: options.delete_strategy,
            settings: options.settings,
            remote: RwLock::new(options.remote),
            remote_guard: AsyncMutex::new(()),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn TableObserver>) {
        self.observers.lock().push(observer);
    }

    pub fn current_table(&self) -> ApplicationTable {
        self.state.lock().table.clone()
    }

    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    pub fn sync_enabled(&self) -> bool {
        self.state.lock().sync_enabled
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    pub fn has_remote(&self) -> bool {
        self.remote.read().is_some()
    }

    pub fn set_remote(&self, remote: Option<Arc<dyn RemoteTable>>) {
        *self.remote.write() = remote;
        self.state.lock().sheet_revision = None;
        info!(target: "sync", "remote sheet replaced");
    }

    pub async fn on_record_added(&self, application: NewApplication) -> AppResult<RecordId> {
        let record = application.into_record(today())?;
        let id = record.id().clone();
        self.mutate(|table| {
            table.push(record);
            Ok(())
        })?;
        info!(target: "sync", record = %id, "application added");
        self.push_now().await;
        Ok(id)
    }

    pub async fn on_record_edited(&self, row: usize, column: Column, value: &str) -> AppResult<()> {
        self.mutate(|table| table.set_field(row, column, value))?;
        debug!(target: "sync", row, %column, "application edited");
        self.push_now().await;
        Ok(())
    }

    pub async fn edit_record(&self, id: &RecordId, column: Column, value: &str) -> AppResult<()> {
        let row = self.mutate(|table| {
            let row = locate(table, id)?;
            table.set_field(row, column, value)?;
            Ok(row)
        })?;
        debug!(target: "sync", record = %id, row, %column, "application edited");
        self.push_now().await;
        Ok(())
    }

    /// `rows` are positions before the delete. Returns how many were removed.
    pub async fn on_records_deleted(&self, rows: &[usize]) -> AppResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut positions: Vec<usize> = rows.to_vec();
        positions.sort_unstable();
        positions.dedup();
        let (_, before) = self.apply(|table| table.remove_positions(&positions))?;
        self.after_delete(&positions, before).await;
        Ok(positions.len())
    }

    pub async fn delete_records(&self, ids: &[RecordId]) -> AppResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let (positions, before) = self.apply(|table| {
            let mut positions = ids
                .iter()
                .map(|id| locate(table, id))
                .collect::<AppResult<Vec<_>>>()?;
            positions.sort_unstable();
            positions.dedup();
            table.remove_positions(&positions)?;
            Ok(positions)
        })?;
        self.after_delete(&positions, before).await;
        Ok(positions.len())
    }

    pub async fn on_sync_toggled(&self, enabled: bool) -> AppResult<PushOutcome> {
        if enabled {
            self.settings.load()?.validate_for_sync()?;
        }
        self.settings.save(&SettingsPatch {
            sync_enabled: Some(enabled),
            ..SettingsPatch::default()
        })?;
        self.state.lock().sync_enabled = enabled;
        info!(target: "sync", enabled, "google sync toggled");
        if enabled {
            Ok(self.push_now().await)
        } else {
            Ok(PushOutcome::Disabled)
        }
    }

    pub async fn push_now(&self) -> PushOutcome {
        if !self.sync_enabled() {
            debug!(target: "sync", "google sync disabled; changes kept local");
            return PushOutcome::Disabled;
        }
        let Some(remote) = self.remote() else {
            warn!(target: "sync", "google sync enabled but no spreadsheet is configured");
            return PushOutcome::Failed;
        };

        let _guard = self.remote_guard.lock().await;
        let (snapshot, revision) = {
            let state = self.state.lock();
            (state.table.clone(), state.revision)
        };
        match remote.overwrite_all(&snapshot).await {
            Ok(()) => {
                self.state.lock().sheet_revision = Some(revision);
                debug!(target: "sync", rows = snapshot.len(), "pushed table to google sheet");
                PushOutcome::Pushed
            }
            Err(err) => {
                self.state.lock().sheet_revision = None;
                warn!(target: "sync", ?err, "push to google sheet failed; local data kept");
                PushOutcome::Failed
            }
        }
    }

    pub async fn pull_once(&self) -> PullOutcome {
        let started_at = {
            let state = self.state.lock();
            if !state.sync_enabled {
                debug!(target: "sync", "google sync disabled; skipping pull");
                return PullOutcome::Disabled;
            }
            state.revision
        };
        let Some(remote) = self.remote() else {
            warn!(target: "sync", "google sync enabled but no spreadsheet is configured");
            return PullOutcome::Failed;
        };

        // Held until the result is applied so a push cannot land in between.
        let _guard = self.remote_guard.lock().await;
        let mut incoming = match remote.read_all().await {
            Ok(table) => table,
            Err(err) => {
                warn!(target: "sync", ?err, "pull from google sheet failed; sync skipped this cycle");
                return PullOutcome::Failed;
            }
        };

        let replaced = {
            let mut state = self.state.lock();
            if state.revision != started_at {
                info!(target: "sync", "local edit during pull; discarding fetched sheet");
                return PullOutcome::Superseded;
            }
            if incoming.is_empty() {
                state.sheet_revision = state.table.is_empty().then_some(started_at);
                debug!(target: "sync", "google sheet is empty; keeping local data");
                return PullOutcome::EmptyRemote;
            }
            if state.table == incoming {
                state.sheet_revision = Some(started_at);
                debug!(target: "sync", "no changes detected in google sheet");
                return PullOutcome::Unchanged;
            }
            incoming.adopt_ids_from(&state.table);
            // Written under the lock so a later edit's write cannot be
            // overtaken by this older snapshot.
            if let Err(err) = write_table(&incoming, &self.data_file) {
                warn!(target: "sync", ?err, "failed to save pulled table locally");
            }
            state.table = incoming;
            state.revision += 1;
            state.sheet_revision = Some(state.revision);
            state.table.clone()
        };

        info!(target: "sync", rows = replaced.len(), "google sheet changed; local data replaced");
        self.notify(&replaced);
        PullOutcome::Replaced {
            rows: replaced.len(),
        }
    }

    /// The first pull runs immediately; a slow pull delays later ticks rather
    /// than stacking them.
    pub fn spawn_timer(self: &Arc<Self>, period: Duration) -> SyncTimer {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let driver = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = &mut stop_rx => break,
                            outcome = driver.pull_once() => {
                                debug!(target: "sync", ?outcome, "scheduled pull finished");
                            }
                        }
                    }
                }
            }
            debug!(target: "sync", "sync timer stopped");
        });
        SyncTimer {
            stop: Some(stop_tx),
            handle,
        }
    }

    /// Applies `change` to a copy, writes the copy to the local file, and only
    /// then makes it current. The whole step runs under the state lock.
    fn mutate<T, F>(&self, change: F) -> AppResult<T>
    where
        F: FnOnce(&mut ApplicationTable) -> AppResult<T>,
    {
        self.apply(change).map(|(output, _)| output)
    }

    /// Like [`Self::mutate`], also returning the revision the change was
    /// applied on top of.
    fn apply<T, F>(&self, change: F) -> AppResult<(T, u64)>
    where
        F: FnOnce(&mut ApplicationTable) -> AppResult<T>,
    {
        let (output, before, snapshot) = {
            let mut state = self.state.lock();
            let mut next = state.table.clone();
            let output = change(&mut next)?;
            write_table(&next, &self.data_file)?;
            let before = state.revision;
            state.table = next;
            state.revision += 1;
            (output, before, state.table.clone())
        };
        self.notify(&snapshot);
        Ok((output, before))
    }

    async fn after_delete(&self, positions: &[usize], before: u64) {
        info!(target: "sync", removed = positions.len(), "applications deleted");
        match self.delete_strategy {
            DeleteStrategy::Rows => self.delete_remote_rows(positions, before).await,
            DeleteStrategy::Overwrite => {
                self.push_now().await;
            }
        }
    }

    async fn delete_remote_rows(&self, positions: &[usize], before: u64) {
        if !self.sync_enabled() {
            return;
        }
        let Some(remote) = self.remote() else {
            warn!(target: "sync", "google sync enabled but no spreadsheet is configured");
            return;
        };
        {
            let _guard = self.remote_guard.lock().await;
            let sheet_revision = self.state.lock().sheet_revision;
            if sheet_revision == Some(before + 1) {
                return;
            }
            if sheet_revision == Some(before) {
                // Highest first so earlier deletes do not shift later targets.
                for position in positions.iter().rev() {
                    let sheet_row = position + 2;
                    if let Err(err) = remote.delete_row(sheet_row).await {
                        self.state.lock().sheet_revision = None;
                        warn!(target: "sync", ?err, sheet_row, "row delete on google sheet failed");
                        return;
                    }
                }
                self.state.lock().sheet_revision = Some(before + 1);
                return;
            }
        }
        debug!(target: "sync", "sheet layout unknown; overwriting instead of deleting rows");
        self.push_now().await;
    }

    fn remote(&self) -> Option<Arc<dyn RemoteTable>> {
        self.remote.read().clone()
    }

    fn notify(&self, table: &ApplicationTable) {
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer.on_refresh(table);
        }
    }
}

fn locate(table: &ApplicationTable, id: &RecordId) -> AppResult<usize> {
    table
        .position_of(id)
        .ok_or_else(|| AppError::NotFound(format!("no application with id {id}")))
}

pub struct SyncTimer {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl SyncTimer {
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(err) = (&mut self.handle).await {
            warn!(target: "sync", ?err, "sync timer task ended abnormally");
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::Notify;

    use super::*;
    use crate::local_store::read_table;
    use crate::paths::AppPaths;
    use crate::records::Status;

    #[derive(Default)]
    struct RecordingRemote {
        sheet: Mutex<ApplicationTable>,
        reads: AtomicUsize,
        overwrites: AtomicUsize,
        deleted_rows: Mutex<Vec<usize>>,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
        read_gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    #[async_trait]
    impl RemoteTable for RecordingRemote {
        async fn read_all(&self) -> AppResult<ApplicationTable> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if let Some((started, release)) = &self.read_gate {
                started.notify_one();
                release.notified().await;
            }
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(AppError::RemoteCall("values.get failed (503)".into()));
            }
            Ok(self.sheet.lock().clone())
        }

        async fn overwrite_all(&self, table: &ApplicationTable) -> AppResult<()> {
            self.overwrites.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(AppError::Timeout(10));
            }
            *self.sheet.lock() = table.clone();
            Ok(())
        }

        async fn delete_row(&self, row_index: usize) -> AppResult<()> {
            self.deleted_rows.lock().push(row_index);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        refreshes: AtomicUsize,
    }

    impl TableObserver for CountingObserver {
        fn on_refresh(&self, _table: &ApplicationTable) {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        _dir: TempDir,
        paths: AppPaths,
        driver: Arc<SyncDriver>,
        remote: Arc<RecordingRemote>,
        observer: Arc<CountingObserver>,
    }

    fn harness(sync_enabled: bool, strategy: DeleteStrategy, remote: RecordingRemote) -> Harness {
        let dir = tempdir().unwrap();
        let paths = AppPaths::at(dir.path());
        paths.ensure_dirs().unwrap();
        let remote = Arc::new(remote);
        let driver = Arc::new(SyncDriver::new(
            DriverOptions {
                data_file: paths.default_data_file(),
                sync_enabled,
                delete_strategy: strategy,
                settings: SettingsStore::new(&paths),
                remote: Some(remote.clone() as Arc<dyn RemoteTable>),
            },
            ApplicationTable::new(),
        ));
        let observer = Arc::new(CountingObserver::default());
        driver.subscribe(observer.clone());
        Harness {
            _dir: dir,
            paths,
            driver,
            remote,
            observer,
        }
    }

    fn table_of(companies: &[&str]) -> ApplicationTable {
        let mut table = ApplicationTable::new();
        for company in companies {
            table.push(
                NewApplication::new(*company, "Engineer", "")
                    .into_record(today())
                    .unwrap(),
            );
        }
        table
    }

    fn companies(table: &ApplicationTable) -> Vec<String> {
        table.records().iter().map(|r| r.company.clone()).collect()
    }

    #[tokio::test]
    async fn saving_with_sync_disabled_never_touches_remote() {
        let h = harness(false, DeleteStrategy::Overwrite, RecordingRemote::default());
        h.driver
            .on_record_added(NewApplication::new("Acme", "Dev", "https://acme.jobs"))
            .await
            .unwrap();

        assert_eq!(h.remote.overwrites.load(Ordering::SeqCst), 0);
        let on_disk = read_table(&h.paths.default_data_file()).unwrap();
        assert_eq!(on_disk.len(), 1);
        let record = on_disk.get(0).unwrap();
        assert_eq!(record.company, "Acme");
        assert_eq!(record.status, Status::Submitted);
        assert_eq!(record.date_applied, Some(today()));
    }

    #[tokio::test]
    async fn saving_with_sync_enabled_overwrites_remote() {
        let h = harness(true, DeleteStrategy::Overwrite, RecordingRemote::default());
        let id = h
            .driver
            .on_record_added(NewApplication::new("Acme", "Dev", ""))
            .await
            .unwrap();

        assert_eq!(h.remote.overwrites.load(Ordering::SeqCst), 1);
        assert_eq!(*h.remote.sheet.lock(), h.driver.current_table());
        assert_eq!(h.driver.current_table().position_of(&id), Some(0));
    }

    #[tokio::test]
    async fn invalid_application_is_rejected_without_side_effects() {
        let h = harness(true, DeleteStrategy::Overwrite, RecordingRemote::default());
        let err = h
            .driver
            .on_record_added(NewApplication::new("", "Dev", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(h.remote.overwrites.load(Ordering::SeqCst), 0);
        assert!(!h.paths.default_data_file().exists());
        assert_eq!(h.observer.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn push_failure_keeps_local_state() {
        let remote = RecordingRemote::default();
        remote.fail_writes.store(true, Ordering::SeqCst);
        let h = harness(true, DeleteStrategy::Overwrite, remote);

        h.driver
            .on_record_added(NewApplication::new("Acme", "Dev", ""))
            .await
            .unwrap();
        assert_eq!(h.driver.current_table().len(), 1);
        assert_eq!(read_table(&h.paths.default_data_file()).unwrap().len(), 1);
        assert_eq!(h.driver.push_now().await, PushOutcome::Failed);
    }

    #[tokio::test]
    async fn pull_replaces_table_once_then_is_idempotent() {
        let h = harness(true, DeleteStrategy::Overwrite, RecordingRemote::default());
        *h.remote.sheet.lock() = table_of(&["Remote A", "Remote B"]);

        assert_eq!(h.driver.pull_once().await, PullOutcome::Replaced { rows: 2 });
        let after_first = h.driver.current_table();
        let ids: Vec<_> = after_first.records().iter().map(|r| r.id().clone()).collect();
        assert_eq!(h.observer.refreshes.load(Ordering::SeqCst), 1);

        assert_eq!(h.driver.pull_once().await, PullOutcome::Unchanged);
        let after_second = h.driver.current_table();
        assert_eq!(after_second, after_first);
        let ids_again: Vec<_> = after_second.records().iter().map(|r| r.id().clone()).collect();
        assert_eq!(ids_again, ids);
        assert_eq!(h.observer.refreshes.load(Ordering::SeqCst), 1);

        let on_disk = read_table(&h.paths.default_data_file()).unwrap();
        assert_eq!(companies(&on_disk), vec!["Remote A", "Remote B"]);
    }

    #[tokio::test]
    async fn pull_is_skipped_when_sync_disabled() {
        let h = harness(false, DeleteStrategy::Overwrite, RecordingRemote::default());
        *h.remote.sheet.lock() = table_of(&["Remote"]);
        assert_eq!(h.driver.pull_once().await, PullOutcome::Disabled);
        assert_eq!(h.remote.reads.load(Ordering::SeqCst), 0);
        assert!(h.driver.current_table().is_empty());
    }

    #[tokio::test]
    async fn failed_or_empty_pull_keeps_local_table() {
        let h = harness(true, DeleteStrategy::Overwrite, RecordingRemote::default());
        h.driver
            .on_record_added(NewApplication::new("Local", "Dev", ""))
            .await
            .unwrap();
        *h.remote.sheet.lock() = ApplicationTable::new();

        assert_eq!(h.driver.pull_once().await, PullOutcome::EmptyRemote);
        h.remote.fail_reads.store(true, Ordering::SeqCst);
        assert_eq!(h.driver.pull_once().await, PullOutcome::Failed);
        assert_eq!(companies(&h.driver.current_table()), vec!["Local"]);
    }

    #[tokio::test]
    async fn stale_remote_pull_reverts_unpushed_edit() {
        let remote = RecordingRemote::default();
        remote.fail_writes.store(true, Ordering::SeqCst);
        let h = harness(true, DeleteStrategy::Overwrite, remote);
        *h.remote.sheet.lock() = table_of(&["Remote"]);

        h.driver
            .on_record_added(NewApplication::new("Local", "Dev", ""))
            .await
            .unwrap();
        assert_eq!(h.driver.pull_once().await, PullOutcome::Replaced { rows: 1 });
        assert_eq!(companies(&h.driver.current_table()), vec!["Remote"]);
    }

    #[tokio::test]
    async fn edit_during_pull_supersedes_fetched_table() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let remote = RecordingRemote {
            read_gate: Some((started.clone(), release.clone())),
            ..RecordingRemote::default()
        };
        let h = harness(false, DeleteStrategy::Overwrite, remote);
        h.driver
            .on_record_added(NewApplication::new("Local", "Dev", ""))
            .await
            .unwrap();
        h.driver.state.lock().sync_enabled = true;
        *h.remote.sheet.lock() = table_of(&["Remote"]);

        let puller = Arc::clone(&h.driver);
        let pull = tokio::spawn(async move { puller.pull_once().await });
        started.notified().await;

        let before = h.driver.revision();
        let editor = Arc::clone(&h.driver);
        let edit = tokio::spawn(async move {
            editor
                .on_record_edited(0, Column::Status, "Interview")
                .await
        });
        while h.driver.revision() == before {
            tokio::task::yield_now().await;
        }
        release.notify_one();

        assert_eq!(pull.await.unwrap(), PullOutcome::Superseded);
        edit.await.unwrap().unwrap();
        let table = h.driver.current_table();
        assert_eq!(companies(&table), vec!["Local"]);
        assert_eq!(table.get(0).unwrap().status, Status::Interview);
    }

    #[tokio::test]
    async fn deleting_renumbers_and_later_edits_use_new_positions() {
        let h = harness(true, DeleteStrategy::Overwrite, RecordingRemote::default());
        for company in ["A", "B", "C"] {
            h.driver
                .on_record_added(NewApplication::new(company, "Dev", ""))
                .await
                .unwrap();
        }

        assert_eq!(h.driver.on_records_deleted(&[1]).await.unwrap(), 1);
        assert_eq!(companies(&h.driver.current_table()), vec!["A", "C"]);

        h.driver
            .on_record_edited(1, Column::Status, "Offer")
            .await
            .unwrap();
        let table = h.driver.current_table();
        assert_eq!(table.get(1).unwrap().company, "C");
        assert_eq!(table.get(1).unwrap().status, Status::Offer);
        assert_eq!(*h.remote.sheet.lock(), table);
        assert!(h.driver.on_record_edited(2, Column::Status, "Offer").await.is_err());
    }

    #[tokio::test]
    async fn id_addressing_survives_deletes() {
        let h = harness(false, DeleteStrategy::Overwrite, RecordingRemote::default());
        let a = h.driver.on_record_added(NewApplication::new("A", "Dev", "")).await.unwrap();
        let b = h.driver.on_record_added(NewApplication::new("B", "Dev", "")).await.unwrap();
        let c = h.driver.on_record_added(NewApplication::new("C", "Dev", "")).await.unwrap();

        h.driver.delete_records(&[a.clone()]).await.unwrap();
        h.driver
            .edit_record(&c, Column::Position, "Lead")
            .await
            .unwrap();

        let table = h.driver.current_table();
        assert_eq!(table.position_of(&b), Some(0));
        assert_eq!(table.get(1).unwrap().position, "Lead");
        assert!(matches!(
            h.driver.edit_record(&a, Column::Position, "x").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn row_strategy_issues_structural_deletes_highest_first() {
        let h = harness(true, DeleteStrategy::Rows, RecordingRemote::default());
        for company in ["A", "B", "C"] {
            h.driver
                .on_record_added(NewApplication::new(company, "Dev", ""))
                .await
                .unwrap();
        }
        let overwrites_before = h.remote.overwrites.load(Ordering::SeqCst);

        h.driver.on_records_deleted(&[2, 0]).await.unwrap();

        assert_eq!(*h.remote.deleted_rows.lock(), vec![4, 2]);
        assert_eq!(h.remote.overwrites.load(Ordering::SeqCst), overwrites_before);
        assert_eq!(companies(&h.driver.current_table()), vec!["B"]);
    }

    #[tokio::test]
    async fn row_strategy_overwrites_when_sheet_layout_is_unknown() {
        let h = harness(true, DeleteStrategy::Rows, RecordingRemote::default());
        h.remote.fail_writes.store(true, Ordering::SeqCst);
        for company in ["A", "B"] {
            h.driver
                .on_record_added(NewApplication::new(company, "Dev", ""))
                .await
                .unwrap();
        }
        h.remote.fail_writes.store(false, Ordering::SeqCst);
        let overwrites_before = h.remote.overwrites.load(Ordering::SeqCst);

        h.driver.on_records_deleted(&[0]).await.unwrap();

        assert!(h.remote.deleted_rows.lock().is_empty());
        assert_eq!(h.remote.overwrites.load(Ordering::SeqCst), overwrites_before + 1);
        assert_eq!(companies(&h.remote.sheet.lock()), vec!["B"]);

        h.driver.on_records_deleted(&[0]).await.unwrap();
        assert_eq!(*h.remote.deleted_rows.lock(), vec![2]);
    }

    #[tokio::test]
    async fn id_edits_and_deletes_follow_records_after_reorder() {
        let h = harness(false, DeleteStrategy::Overwrite, RecordingRemote::default());
        let mut ids = Vec::new();
        for company in ["A", "B", "C"] {
            ids.push(
                h.driver
                    .on_record_added(NewApplication::new(company, "Dev", ""))
                    .await
                    .unwrap(),
            );
        }
        let records = h.driver.current_table().records().to_vec();
        h.driver.state.lock().table = ApplicationTable::from_records(vec![
            records[2].clone(),
            records[0].clone(),
            records[1].clone(),
        ]);

        h.driver
            .edit_record(&ids[2], Column::Status, "Offer")
            .await
            .unwrap();
        let table = h.driver.current_table();
        assert_eq!(companies(&table), vec!["C", "A", "B"]);
        assert_eq!(table.get(0).unwrap().status, Status::Offer);
        assert_eq!(table.get(1).unwrap().status, Status::Submitted);

        assert_eq!(h.driver.delete_records(&[ids[0].clone()]).await.unwrap(), 1);
        assert_eq!(companies(&h.driver.current_table()), vec!["C", "B"]);
        assert!(matches!(
            h.driver.edit_record(&ids[0], Column::Status, "Offer").await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(read_table(h.driver.data_file()).unwrap(), h.driver.current_table());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_pulls_and_adds_leave_file_matching_memory() {
        let remote = RecordingRemote::default();
        remote.fail_writes.store(true, Ordering::SeqCst);
        let h = harness(true, DeleteStrategy::Overwrite, remote);

        let sheet = Arc::clone(&h.remote);
        let puller = Arc::clone(&h.driver);
        let pulls = tokio::spawn(async move {
            for round in 0..40 {
                let names: &[&str] = if round % 2 == 0 {
                    &["Remote A"]
                } else {
                    &["Remote B", "Remote C"]
                };
                *sheet.sheet.lock() = table_of(names);
                puller.pull_once().await;
            }
        });
        for n in 0..40 {
            h.driver
                .on_record_added(NewApplication::new(format!("Local {n}"), "Dev", ""))
                .await
                .unwrap();
        }
        pulls.await.unwrap();

        assert_eq!(read_table(h.driver.data_file()).unwrap(), h.driver.current_table());
    }

    #[tokio::test]
    async fn enabling_sync_requires_key_file_and_spreadsheet() {
        let h = harness(false, DeleteStrategy::Overwrite, RecordingRemote::default());
        let err = h.driver.on_sync_toggled(true).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(!h.driver.sync_enabled());
        assert!(!SettingsStore::new(&h.paths).load().unwrap().sync_enabled);
        assert_eq!(h.remote.overwrites.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn toggling_sync_persists_flag_and_pushes() {
        let h = harness(false, DeleteStrategy::Overwrite, RecordingRemote::default());
        std::fs::write(h.paths.default_service_account_file(), "{}").unwrap();
        SettingsStore::new(&h.paths)
            .save(&SettingsPatch {
                spreadsheet_id: Some("sheet-123".into()),
                ..SettingsPatch::default()
            })
            .unwrap();
        h.driver
            .on_record_added(NewApplication::new("Acme", "Dev", ""))
            .await
            .unwrap();

        assert_eq!(h.driver.on_sync_toggled(true).await.unwrap(), PushOutcome::Pushed);
        assert!(SettingsStore::new(&h.paths).load().unwrap().sync_enabled);
        assert_eq!(h.remote.overwrites.load(Ordering::SeqCst), 1);

        assert_eq!(
            h.driver.on_sync_toggled(false).await.unwrap(),
            PushOutcome::Disabled
        );
        assert!(!SettingsStore::new(&h.paths).load().unwrap().sync_enabled);
        assert_eq!(h.remote.overwrites.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timer_pulls_until_stopped() {
        let h = harness(true, DeleteStrategy::Overwrite, RecordingRemote::default());
        *h.remote.sheet.lock() = table_of(&["Remote"]);

        let timer = h.driver.spawn_timer(Duration::from_millis(10));
        for _ in 0..200 {
            if h.remote.reads.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        timer.stop().await;

        let reads = h.remote.reads.load(Ordering::SeqCst);
        assert!(reads >= 2);
        assert_eq!(companies(&h.driver.current_table()), vec!["Remote"]);
        assert_eq!(h.observer.refreshes.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(h.remote.reads.load(Ordering::SeqCst), reads);
    }
}
