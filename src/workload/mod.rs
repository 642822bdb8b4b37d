pub mod data;
pub mod timing;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::Pacing;
use crate::error::WorkloadError;
use crate::metrics::MetricsCollector;
use crate::namespace;
use crate::store::{ChangeCallback, Patch, Snapshot, Store, Subscription};

use self::timing::timed;

// ─── Operation names ─────────────────────────────────────────────

pub mod ops {
    pub const CREATE_TEAM: &str = "create_team";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const JOIN_CREW: &str = "join_crew";
    pub const ASSIGN_ROLE: &str = "assign_role";
    pub const START_GAME: &str = "start_game";
    pub const SELECT_CANDIDATE: &str = "select_candidate";
    pub const CONFIRM_SELECTION: &str = "confirm_selection";
    pub const COMPLETE_LEVEL_1: &str = "complete_level_1";
    pub const CONTRIBUTE_PLAN: &str = "contribute_plan";
    pub const COMPLETE_LEVEL_2: &str = "complete_level_2";
    pub const WRITE_REPORT: &str = "write_report";
    pub const COMPLETE_LEVEL_3: &str = "complete_level_3";
    pub const UPDATE_META: &str = "update_meta";
    pub const AWARD_BADGES: &str = "award_badges";
    pub const VERIFY_READ: &str = "verify_read";

    /// Script order; the report lists operations in this order first.
    pub const CANONICAL_ORDER: &[&str] = &[
        CREATE_TEAM,
        SUBSCRIBE,
        JOIN_CREW,
        ASSIGN_ROLE,
        START_GAME,
        SELECT_CANDIDATE,
        CONFIRM_SELECTION,
        COMPLETE_LEVEL_1,
        CONTRIBUTE_PLAN,
        COMPLETE_LEVEL_2,
        WRITE_REPORT,
        COMPLETE_LEVEL_3,
        UPDATE_META,
        AWARD_BADGES,
        VERIFY_READ,
    ];
}

// ─── Team script ─────────────────────────────────────────────────

/// Identity and size of one team.
#[derive(Debug, Clone)]
pub struct TeamSpec {
    pub index: usize,
    pub name: String,
    /// Total participants, commander included. At least 1.
    pub players: usize,
}

pub struct TeamWorkload {
    store: Arc<dyn Store>,
    metrics: Arc<MetricsCollector>,
    pacing: Pacing,
    rng: StdRng,

    spec: TeamSpec,
    team_id: String,
    team_path: String,
    /// Index 0 is the commander.
    participants: Vec<String>,

    /// Armed right before a write the commander's subscription should see.
    probe: Arc<Mutex<Option<Instant>>>,
    subscriptions: Vec<Subscription>,
    total_score: u64,
}

impl TeamWorkload {
    pub fn new(
        store: Arc<dyn Store>,
        metrics: Arc<MetricsCollector>,
        spec: TeamSpec,
        pacing: Pacing,
        rng: StdRng,
    ) -> Self {
        let team_id = namespace::team_id(&spec.name);
        let team_path = namespace::team_path(&team_id);
        let participants = (0..spec.players.max(1))
            .map(|p| namespace::participant_id(spec.index, p))
            .collect();

        Self {
            store,
            metrics,
            pacing,
            rng,
            spec,
            team_id,
            team_path,
            participants,
            probe: Arc::new(Mutex::new(None)),
            subscriptions: Vec::new(),
            total_score: 0,
        }
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    /// Runs every phase in order. Returns the team id on success.
    pub async fn run(mut self) -> Result<String, WorkloadError> {
        self.create().await?;
        self.subscribe_participants().await?;
        self.join_crew().await?;
        self.assign_roles().await?;
        self.start().await?;
        self.level_one().await?;
        self.level_two().await?;
        self.level_three().await?;
        self.verify().await?;
        self.teardown();
        Ok(self.team_id)
    }

    fn path(&self, rel: &str) -> String {
        format!("{}/{}", self.team_path, rel)
    }

    fn arm_probe(&self) {
        *self.probe.lock() = Some(Instant::now());
    }

    async fn write(&mut self, op: &str, path: String, value: Value) -> Result<(), WorkloadError> {
        timed(&self.metrics, op, self.store.write(&path, value)).await
    }

    async fn update(&mut self, op: &str, path: String, patch: Patch) -> Result<(), WorkloadError> {
        timed(&self.metrics, op, self.store.update(&path, patch)).await
    }

    async fn attach(&mut self, callback: ChangeCallback) -> Result<(), WorkloadError> {
        let sub = timed(
            &self.metrics,
            ops::SUBSCRIBE,
            self.store.subscribe(&self.team_path, callback),
        )
        .await?;
        self.subscriptions.push(sub);
        Ok(())
    }

    fn silent() -> ChangeCallback {
        Arc::new(|_snapshot: &Snapshot| {})
    }

    // ── 1. Create ───────────────────────────────────────────────

    async fn create(&mut self) -> Result<(), WorkloadError> {
        let record = data::initial_team(
            &self.spec.name,
            &self.participants[0],
            &data::display_name(self.spec.index, 0),
            self.participants.len(),
        );
        let path = self.team_path.clone();
        self.write(ops::CREATE_TEAM, path, record).await
    }

    // ── 2. Subscribe ────────────────────────────────────────────

    /// One listener per participant, each counted as an open connection.
    ///
    /// The commander's also measures propagation: when it fires with a
    /// probe armed, the delay since arming is recorded and the probe is
    /// cleared so a later unrelated firing can't count it again.
    async fn subscribe_participants(&mut self) -> Result<(), WorkloadError> {
        let probe = self.probe.clone();
        let metrics = self.metrics.clone();
        let measuring: ChangeCallback = Arc::new(move |_snapshot: &Snapshot| {
            if let Some(armed) = probe.lock().take() {
                metrics.record_listener_propagation(armed.elapsed().as_secs_f64() * 1000.0);
            }
        });
        self.attach(measuring).await?;
        self.metrics.connection_opened();

        for _ in 1..self.participants.len() {
            self.attach(Self::silent()).await?;
            self.metrics.connection_opened();
        }
        Ok(())
    }

    // ── 3. Join crew ────────────────────────────────────────────

    async fn join_crew(&mut self) -> Result<(), WorkloadError> {
        let crew = self.participants.len() - 1;
        for p in 1..=crew {
            let pid = self.participants[p].clone();
            let record = data::participant(&data::display_name(self.spec.index, p), false);
            self.write(ops::JOIN_CREW, self.path(&format!("players/{pid}")), record)
                .await?;

            // rides on the connection opened for this participant in phase 2
            self.attach(Self::silent()).await?;

            if p < crew {
                let (lo, hi) = self.pacing.join_delay_ms;
                if hi > 0 {
                    let ms = self.rng.gen_range(lo..=hi.max(lo));
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
            }
        }
        Ok(())
    }

    // ── 4. Role assignment ──────────────────────────────────────

    async fn assign_roles(&mut self) -> Result<(), WorkloadError> {
        for i in 0..self.participants.len() {
            let pid = self.participants[i].clone();
            let record = data::role_assignment(data::role_for(i));
            self.write(ops::ASSIGN_ROLE, self.path(&format!("roles/{pid}")), record)
                .await?;
        }
        Ok(())
    }

    // ── 5. Start ────────────────────────────────────────────────

    async fn start(&mut self) -> Result<(), WorkloadError> {
        self.arm_probe();
        let patch = Patch::new()
            .set("started", json!(true))
            .set("started_at", json!(data::now_ms()))
            .set("level", json!(1));
        self.update(ops::START_GAME, self.path("meta"), patch).await?;

        if !self.pacing.settle.is_zero() {
            tokio::time::sleep(self.pacing.settle).await;
        }
        Ok(())
    }

    // ── 6. Level 1: selections, per-role confirmation, completion ──

    async fn level_one(&mut self) -> Result<(), WorkloadError> {
        let mut picks: Vec<(usize, String)> = Vec::with_capacity(self.participants.len());
        for i in 0..self.participants.len() {
            let pid = self.participants[i].clone();
            let role = data::role_for(i);
            let choice = data::candidate(&mut self.rng, role);
            let record = data::selection(role, &choice);
            self.write(
                ops::SELECT_CANDIDATE,
                self.path(&format!("levels/1/selections/{pid}")),
                record,
            )
            .await?;
            picks.push((i, choice));
        }

        let mut finalized = Map::new();
        for role in data::ROLES {
            let confirmed_by: Vec<String> = picks
                .iter()
                .filter(|(i, _)| data::role_for(*i) == *role)
                .map(|(i, _)| self.participants[*i].clone())
                .collect();
            let choice = match picks.iter().find(|(i, _)| data::role_for(*i) == *role) {
                Some((_, c)) => c.clone(),
                None => data::candidate(&mut self.rng, role),
            };
            let patch = Patch::new()
                .set(format!("confirmed/{role}/choice"), json!(choice))
                .set(format!("confirmed/{role}/confirmed_by"), json!(confirmed_by));
            self.update(ops::CONFIRM_SELECTION, self.path("levels/1"), patch)
                .await?;
            finalized.insert(role.to_string(), json!(choice));
        }

        let score = data::score(&mut self.rng);
        let result = json!({
            "finalized": finalized,
            "score": score,
            "completed_at": data::now_ms(),
        });
        self.arm_probe();
        self.write(ops::COMPLETE_LEVEL_1, self.path("levels/1/result"), result)
            .await?;

        self.total_score = score;
        let meta = Patch::new()
            .set("level", json!(2))
            .set("total_score", json!(self.total_score));
        self.update(ops::UPDATE_META, self.path("meta"), meta).await
    }

    // ── 7. Level 2: shared plan, completion ─────────────────────

    async fn level_two(&mut self) -> Result<(), WorkloadError> {
        let contributors = data::PLAN_CONTRIBUTORS.min(self.participants.len());
        let mut plan = Map::new();
        for k in 0..contributors {
            let author = self.participants[k].clone();
            let action = data::plan_action(&mut self.rng);
            let step = data::plan_step(&author, action, k);
            let key = format!("step_{k}");
            let patch = Patch::new().set(format!("steps/{key}"), step.clone());
            self.update(ops::CONTRIBUTE_PLAN, self.path("levels/2/plan"), patch)
                .await?;
            plan.insert(key, step);
        }

        let score = data::score(&mut self.rng);
        let result = json!({
            "plan": { "steps": plan },
            "score": score,
            "completed_at": data::now_ms(),
        });
        self.arm_probe();
        self.write(ops::COMPLETE_LEVEL_2, self.path("levels/2/result"), result)
            .await?;

        self.total_score += score;
        let meta = Patch::new()
            .set("level", json!(3))
            .set("total_score", json!(self.total_score));
        self.update(ops::UPDATE_META, self.path("meta"), meta).await
    }

    // ── 8. Level 3: report sections, completion, badges ─────────

    async fn level_three(&mut self) -> Result<(), WorkloadError> {
        for (k, section) in data::REPORT_SECTIONS.iter().enumerate() {
            let author = self.participants[k % self.participants.len()].clone();
            let record = data::report_section(&author, section);
            self.write(
                ops::WRITE_REPORT,
                self.path(&format!("levels/3/report/{section}")),
                record,
            )
            .await?;
        }

        let score = data::score(&mut self.rng);
        let result = json!({ "score": score, "completed_at": data::now_ms() });
        self.arm_probe();
        self.write(ops::COMPLETE_LEVEL_3, self.path("levels/3/result"), result)
            .await?;

        self.total_score += score;
        let meta = Patch::new()
            .set("finished", json!(true))
            .set("total_score", json!(self.total_score))
            .set("final_score", json!(self.total_score));
        self.update(ops::UPDATE_META, self.path("meta"), meta).await?;

        self.write(ops::AWARD_BADGES, self.path("badges"), data::badges())
            .await
    }

    // ── 9. Verify ───────────────────────────────────────────────

    async fn verify(&mut self) -> Result<(), WorkloadError> {
        let snapshot = timed(
            &self.metrics,
            ops::VERIFY_READ,
            self.store.read(&self.team_path),
        )
        .await?;
        if snapshot.exists() {
            self.metrics.add_data_transferred(snapshot.estimated_bytes());
        } else {
            debug!(team = %self.team_id, "final read found no record");
        }
        Ok(())
    }

    // ── 10. Teardown ────────────────────────────────────────────

    /// Detaches every listener from phases 2 and 3, then closes one
    /// connection per participant.
    fn teardown(&mut self) {
        for sub in self.subscriptions.drain(..) {
            sub.unsubscribe();
        }
        for _ in 0..self.participants.len() {
            self.metrics.connection_closed();
        }
    }
}
