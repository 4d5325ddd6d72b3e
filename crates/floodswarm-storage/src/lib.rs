//! DuckDB-backed event log for floodswarm mission telemetry.
//!
//! The simulation core never depends on storage success: write failures
//! are reported and dropped, matching the event log's role as an
//! append-only external sink.

use duckdb::{Connection, Transaction, params};
use floodswarm_core::{
    DroneId, MissionEvent, MissionPersistence, MissionSummary, Tick, TickSummary, VictimId,
};
use slotmap::Key;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use thiserror::Error;

const DEFAULT_FLUSH_THRESHOLD: usize = 64;

/// Storage error wrapper.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
    #[error("storage worker error: {0}")]
    Worker(String),
}

fn drone_key(id: DroneId) -> i64 {
    id.data().as_ffi() as i64
}

fn victim_key(id: VictimId) -> i64 {
    id.data().as_ffi() as i64
}

/// Detection row appended once per generated victim.
#[derive(Debug, Clone)]
struct DetectionRow {
    tick: i64,
    victim_id: i64,
    x: f64,
    y: f64,
}

/// Allocation row appended whenever the allocator rebinds a drone.
#[derive(Debug, Clone)]
struct AllocationRow {
    tick: i64,
    drone_id: i64,
    victim_id: i64,
    distance: f64,
    fallback: bool,
}

/// Rescue row; the victim id is the primary key, so routing is
/// observably at-most-once.
#[derive(Debug, Clone)]
struct RescueRow {
    victim_id: i64,
    tick: i64,
    drone_id: i64,
    team: String,
    x: f64,
    y: f64,
    distance: f64,
    timestamp_ms: i64,
}

/// Per-tick summary row.
#[derive(Debug, Clone)]
struct TickRow {
    tick: i64,
    remaining: i64,
    rescued_total: i64,
    drone_count: i64,
}

/// Final mission summary row with the per-drone tallies as JSON.
#[derive(Debug, Clone)]
struct SummaryRow {
    completed_tick: i64,
    total_detected: i64,
    total_rescued: i64,
    tallies: String,
}

#[derive(Debug, Default)]
struct StorageBuffer {
    detections: Vec<DetectionRow>,
    allocations: Vec<AllocationRow>,
    rescues: Vec<RescueRow>,
    ticks: Vec<TickRow>,
    summaries: Vec<SummaryRow>,
}

impl StorageBuffer {
    fn is_empty(&self) -> bool {
        self.detections.is_empty()
            && self.allocations.is_empty()
            && self.rescues.is_empty()
            && self.ticks.is_empty()
            && self.summaries.is_empty()
    }

    fn len(&self) -> usize {
        self.detections.len()
            + self.allocations.len()
            + self.rescues.len()
            + self.ticks.len()
            + self.summaries.len()
    }

    fn clear(&mut self) {
        self.detections.clear();
        self.allocations.clear();
        self.rescues.clear();
        self.ticks.clear();
        self.summaries.clear();
    }
}

/// DuckDB-backed persistence sink with buffered writes.
pub struct Storage {
    conn: Connection,
    buffer: StorageBuffer,
    flush_threshold: usize,
}

impl Storage {
    /// Open or create a DuckDB database at the provided path.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory database, used by tests and dry runs.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        let mut storage = Self {
            conn,
            buffer: StorageBuffer::default(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn initialize_schema(&mut self) -> Result<(), StorageError> {
        self.conn.execute(
            "create table if not exists detections (
                tick bigint,
                victim_id bigint,
                x double,
                y double,
                primary key (tick, victim_id)
            )",
            [],
        )?;
        self.conn.execute(
            "create table if not exists allocations (
                tick bigint,
                drone_id bigint,
                victim_id bigint,
                distance double,
                fallback boolean
            )",
            [],
        )?;
        self.conn.execute(
            "create table if not exists rescues (
                victim_id bigint primary key,
                tick bigint,
                drone_id bigint,
                team text,
                x double,
                y double,
                distance double,
                timestamp_ms bigint
            )",
            [],
        )?;
        self.conn.execute(
            "create table if not exists ticks (
                tick bigint primary key,
                remaining integer,
                rescued_total integer,
                drone_count integer
            )",
            [],
        )?;
        self.conn.execute(
            "create table if not exists missions (
                completed_tick bigint,
                total_detected integer,
                total_rescued integer,
                tallies json
            )",
            [],
        )?;
        Ok(())
    }

    /// Buffer one algorithmic event. Region assignments and partition
    /// fallbacks are presentation-only lines and are not persisted.
    pub fn record_event(&mut self, tick: Tick, event: &MissionEvent) -> Result<(), StorageError> {
        match event {
            MissionEvent::Detection { victim, position } => {
                self.buffer.detections.push(DetectionRow {
                    tick: tick.0 as i64,
                    victim_id: victim_key(*victim),
                    x: position.x,
                    y: position.y,
                });
            }
            MissionEvent::Allocation {
                drone,
                victim,
                distance,
                fallback,
            } => {
                self.buffer.allocations.push(AllocationRow {
                    tick: tick.0 as i64,
                    drone_id: drone_key(*drone),
                    victim_id: victim_key(*victim),
                    distance: *distance,
                    fallback: *fallback,
                });
            }
            MissionEvent::Rescue(rescue) => {
                self.buffer.rescues.push(RescueRow {
                    victim_id: victim_key(rescue.victim),
                    tick: rescue.tick.0 as i64,
                    drone_id: drone_key(rescue.drone),
                    team: rescue.team.clone(),
                    x: rescue.victim_position.x,
                    y: rescue.victim_position.y,
                    distance: rescue.distance,
                    timestamp_ms: rescue.timestamp_ms as i64,
                });
            }
            MissionEvent::MissionComplete(summary) => {
                self.buffer.summaries.push(SummaryRow {
                    completed_tick: tick.0 as i64,
                    total_detected: summary.total_detected as i64,
                    total_rescued: summary.total_rescued as i64,
                    tallies: tallies_json(summary),
                });
            }
            MissionEvent::RegionAssigned { .. } | MissionEvent::PartitionFallback { .. } => {}
        }
        self.flush_if_full()
    }

    /// Buffer one per-tick summary.
    pub fn record_tick(&mut self, summary: &TickSummary) -> Result<(), StorageError> {
        self.buffer.ticks.push(TickRow {
            tick: summary.tick.0 as i64,
            remaining: summary.remaining as i64,
            rescued_total: summary.rescued_total as i64,
            drone_count: summary.drone_count as i64,
        });
        self.flush_if_full()
    }

    fn flush_if_full(&mut self) -> Result<(), StorageError> {
        if self.buffer.len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Force flush buffered records to disk.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        Self::insert_detections(&tx, &self.buffer.detections)?;
        Self::insert_allocations(&tx, &self.buffer.allocations)?;
        Self::insert_rescues(&tx, &self.buffer.rescues)?;
        Self::insert_ticks(&tx, &self.buffer.ticks)?;
        Self::insert_summaries(&tx, &self.buffer.summaries)?;
        tx.commit()?;
        self.buffer.clear();
        Ok(())
    }

    fn insert_detections(
        tx: &Transaction<'_>,
        rows: &[DetectionRow],
    ) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = tx.prepare(
            "insert or replace into detections (tick, victim_id, x, y) values (?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.execute(params![row.tick, row.victim_id, row.x, row.y])?;
        }
        Ok(())
    }

    fn insert_allocations(
        tx: &Transaction<'_>,
        rows: &[AllocationRow],
    ) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = tx.prepare(
            "insert into allocations (tick, drone_id, victim_id, distance, fallback)
             values (?, ?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.tick,
                row.drone_id,
                row.victim_id,
                row.distance,
                row.fallback,
            ])?;
        }
        Ok(())
    }

    fn insert_rescues(tx: &Transaction<'_>, rows: &[RescueRow]) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = tx.prepare(
            "insert or replace into rescues (
                victim_id, tick, drone_id, team, x, y, distance, timestamp_ms
            ) values (?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.victim_id,
                row.tick,
                row.drone_id,
                &row.team,
                row.x,
                row.y,
                row.distance,
                row.timestamp_ms,
            ])?;
        }
        Ok(())
    }

    fn insert_ticks(tx: &Transaction<'_>, rows: &[TickRow]) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = tx.prepare(
            "insert or replace into ticks (tick, remaining, rescued_total, drone_count)
             values (?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.tick,
                row.remaining,
                row.rescued_total,
                row.drone_count,
            ])?;
        }
        Ok(())
    }

    fn insert_summaries(tx: &Transaction<'_>, rows: &[SummaryRow]) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = tx.prepare(
            "insert into missions (completed_tick, total_detected, total_rescued, tallies)
             values (?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.completed_tick,
                row.total_detected,
                row.total_rescued,
                &row.tallies,
            ])?;
        }
        Ok(())
    }

    /// Number of recorded detections.
    pub fn detection_count(&mut self) -> Result<i64, StorageError> {
        self.flush()?;
        let count = self
            .conn
            .query_row("select count(*) from detections", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Number of recorded rescues.
    pub fn rescue_count(&mut self) -> Result<i64, StorageError> {
        self.flush()?;
        let count = self
            .conn
            .query_row("select count(*) from rescues", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Most recent tick summaries, newest first.
    pub fn recent_ticks(&mut self, limit: usize) -> Result<Vec<TickSummary>, StorageError> {
        self.flush()?;
        let mut stmt = self.conn.prepare(
            "select tick, remaining, rescued_total, drone_count
             from ticks order by tick desc limit ?",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut summaries = Vec::new();
        while let Some(row) = rows.next()? {
            summaries.push(TickSummary {
                tick: Tick(row.get::<_, i64>(0)? as u64),
                remaining: row.get::<_, i64>(1)? as usize,
                rescued_total: row.get::<_, i64>(2)? as usize,
                drone_count: row.get::<_, i64>(3)? as usize,
            });
        }
        Ok(summaries)
    }

    /// Detected/rescued totals from the latest completed mission.
    pub fn mission_totals(&mut self) -> Result<Option<(i64, i64)>, StorageError> {
        self.flush()?;
        let mut stmt = self.conn.prepare(
            "select total_detected, total_rescued
             from missions order by completed_tick desc limit 1",
        )?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some((row.get(0)?, row.get(1)?))),
            None => Ok(None),
        }
    }
}

fn tallies_json(summary: &MissionSummary) -> String {
    serde_json::to_string(&summary.tallies).unwrap_or_else(|_| "[]".to_owned())
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            eprintln!("failed to flush mission telemetry on drop: {err}");
        }
    }
}

impl MissionPersistence for Storage {
    fn on_event(&mut self, tick: Tick, event: &MissionEvent) {
        if let Err(err) = self.record_event(tick, event) {
            eprintln!("failed to record event at tick {}: {err}", tick.0);
        }
    }

    fn on_tick(&mut self, summary: &TickSummary) {
        if let Err(err) = self.record_tick(summary) {
            eprintln!("failed to record tick {}: {err}", summary.tick.0);
        }
    }
}

#[derive(Debug)]
enum StorageCommand {
    Event(Tick, MissionEvent),
    TickSummary(TickSummary),
    Flush,
    Shutdown,
}

/// Asynchronous persistence pipeline: a dedicated writer thread keeps
/// DuckDB work off the simulation clock.
pub struct StoragePipeline {
    tx: mpsc::Sender<StorageCommand>,
    storage: Arc<Mutex<Storage>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StoragePipeline {
    /// Open the database and spawn the writer thread.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        Self::from_storage(Storage::open(path)?)
    }

    /// In-memory pipeline for tests and dry runs.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::from_storage(Storage::in_memory()?)
    }

    fn from_storage(storage: Storage) -> Result<Self, StorageError> {
        let shared = Arc::new(Mutex::new(storage));
        let (tx, rx) = mpsc::channel::<StorageCommand>();
        let worker_storage = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("floodswarm-storage-worker".into())
            .spawn(move || {
                while let Ok(command) = rx.recv() {
                    let Ok(mut storage) = worker_storage.lock() else {
                        eprintln!("storage mutex poisoned; writer thread exiting");
                        break;
                    };
                    match command {
                        StorageCommand::Event(tick, event) => {
                            if let Err(err) = storage.record_event(tick, &event) {
                                eprintln!("failed to record event at tick {}: {err}", tick.0);
                            }
                        }
                        StorageCommand::TickSummary(summary) => {
                            if let Err(err) = storage.record_tick(&summary) {
                                eprintln!("failed to record tick {}: {err}", summary.tick.0);
                            }
                        }
                        StorageCommand::Flush => {
                            if let Err(err) = storage.flush() {
                                eprintln!("failed to flush storage: {err}");
                            }
                        }
                        StorageCommand::Shutdown => {
                            let _ = storage.flush();
                            break;
                        }
                    }
                }
            })
            .map_err(|err| {
                StorageError::Worker(format!("failed to spawn storage worker thread: {err}"))
            })?;

        Ok(Self {
            tx,
            storage: shared,
            handle: Some(handle),
        })
    }

    /// Shared access to the underlying storage for read-back queries.
    #[must_use]
    pub fn storage(&self) -> Arc<Mutex<Storage>> {
        Arc::clone(&self.storage)
    }

    /// Request an immediate flush of buffered records.
    pub fn flush(&self) {
        let _ = self.tx.send(StorageCommand::Flush);
    }
}

impl MissionPersistence for StoragePipeline {
    fn on_event(&mut self, tick: Tick, event: &MissionEvent) {
        if self
            .tx
            .send(StorageCommand::Event(tick, event.clone()))
            .is_err()
        {
            eprintln!("storage worker channel closed; event at tick {} dropped", tick.0);
        }
    }

    fn on_tick(&mut self, summary: &TickSummary) {
        if self
            .tx
            .send(StorageCommand::TickSummary(summary.clone()))
            .is_err()
        {
            eprintln!("storage worker channel closed; tick {} dropped", summary.tick.0);
        }
    }
}

impl Drop for StoragePipeline {
    fn drop(&mut self) {
        let _ = self.tx.send(StorageCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
