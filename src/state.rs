//! Shared process state (spec §5 — "Shared state").
//!
//! Every structure named in the spec's concurrency section is wrapped in its
//! own `Mutex` rather than one coarse lock, so the HTTP handlers and the two
//! background workers never block each other on unrelated work.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::config::Config;
use crate::dedupe::DuplicateWindow;
use crate::error_tracker::ConsecutiveErrorTracker;
use crate::mode::ModeMachine;
use crate::queue::ForwardQueue;
use crate::sink::{ServiceAccount, SinkClient};
use crate::spool::replay_state::ReplayState;
use crate::spool::SpoolWriter;
use crate::summary::SummaryRing;
use crate::webhook::WebhookClient;

pub struct AppState {
    pub config: Config,
    pub mode: ModeMachine,

    pub dedupe: Mutex<DuplicateWindow>,
    pub summary: Mutex<SummaryRing>,
    pub queue: Mutex<ForwardQueue>,
    pub spool: SpoolWriter,
    pub replay_cache: Mutex<ReplayState>,

    pub webhook: WebhookClient,
    pub sink: SinkClient,
    pub webhook_errors: ConsecutiveErrorTracker,
    pub sink_errors: ConsecutiveErrorTracker,

    pub received_count: AtomicU64,
    pub worker_busy: AtomicBool,
    pub replay_busy: AtomicBool,
    pub shutting_down: AtomicBool,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let mode = ModeMachine::from_config(&config);

        let service_account = config
            .google_service_account_json_b64
            .as_deref()
            .or(config.google_service_account_json.as_deref())
            .map(ServiceAccount::parse)
            .transpose()?;

        let webhook = WebhookClient::new(
            config.gas_webapp_url.clone(),
            config.itplaylab_secret.clone(),
            config.gas_timeout_ms,
        )?;
        let sink = SinkClient::new(
            service_account,
            config.sheet_id.clone(),
            config.events_sheet_name.clone(),
        );

        let spool_path = config.spool_path();
        let replay_state_path = config.replay_state_path();
        let replay_cache = crate::spool::replay_state::load(&replay_state_path);

        Ok(Self {
            dedupe: Mutex::new(DuplicateWindow::new(config.dedupe_window_ms)),
            summary: Mutex::new(SummaryRing::new(config.store_limit)),
            queue: Mutex::new(ForwardQueue::new(
                config.queue_limit,
                config.worker_batch_size,
                config.worker_max_retry,
                config.worker_backoff_base_ms,
            )),
            spool: SpoolWriter::new(spool_path, config.jsonl_max_bytes),
            replay_cache: Mutex::new(replay_cache),
            webhook,
            sink,
            webhook_errors: ConsecutiveErrorTracker::new(),
            sink_errors: ConsecutiveErrorTracker::new(),
            received_count: AtomicU64::new(0),
            worker_busy: AtomicBool::new(false),
            replay_busy: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            mode,
            config,
        })
    }

    pub fn replay_state_path(&self) -> PathBuf {
        self.config.replay_state_path()
    }

    pub fn bump_received(&self) -> u64 {
        self.received_count.fetch_add(1, Ordering::Relaxed) + 1
    }
}
