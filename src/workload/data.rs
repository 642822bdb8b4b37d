use chrono::Utc;
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::{json, Map, Value};

// ─── Pools ───────────────────────────────────────────────────────

/// Functional roles, assigned round-robin by participant index.
pub static ROLES: &[&str] = &["pilot", "engineer", "navigator", "medic"];

static CALLSIGNS: &[&str] = &[
    "Emma", "Liam", "Olivia", "Noah", "Ava", "Ethan", "Sophia", "Mason", "Isabella", "William",
    "Mia", "James", "Charlotte", "Benjamin", "Amelia", "Lucas", "Harper", "Henry", "Evelyn",
    "Alexander",
];

static PLAN_ACTIONS: &[&str] = &[
    "reroute_power",
    "scan_sector",
    "repair_hull",
    "plot_course",
    "ration_supplies",
    "signal_base",
];

/// Level-3 report sections, each written by a different participant.
pub static REPORT_SECTIONS: &[&str] = &["summary", "findings", "next_steps"];

static BADGES: &[&str] = &["first_flight", "team_player", "mission_complete"];

/// How many participants contribute to the level-2 plan.
pub const PLAN_CONTRIBUTORS: usize = 3;

// ─── Helpers ─────────────────────────────────────────────────────

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn role_for(participant_index: usize) -> &'static str {
    ROLES[participant_index % ROLES.len()]
}

pub fn display_name(team_index: usize, participant_index: usize) -> String {
    let base = CALLSIGNS[(team_index + participant_index) % CALLSIGNS.len()];
    format!("{base} {}-{}", team_index + 1, participant_index + 1)
}

pub fn score(rng: &mut StdRng) -> u64 {
    rng.gen_range(60..=100)
}

pub fn candidate(rng: &mut StdRng, role: &str) -> String {
    format!("{role}_option_{}", rng.gen_range(1..=4u8))
}

pub fn plan_action(rng: &mut StdRng) -> &'static str {
    PLAN_ACTIONS[rng.gen_range(0..PLAN_ACTIONS.len())]
}

// ─── Records ─────────────────────────────────────────────────────

pub fn participant(name: &str, is_commander: bool) -> Value {
    json!({
        "name": name,
        "is_commander": is_commander,
        "joined_at": now_ms(),
        "online": true,
    })
}

/// Full initial state of a team, commander already joined.
pub fn initial_team(
    team_name: &str,
    commander_id: &str,
    commander_name: &str,
    player_count: usize,
) -> Value {
    let mut players = Map::new();
    players.insert(commander_id.to_string(), participant(commander_name, true));

    json!({
        "meta": {
            "name": team_name,
            "commander": commander_id,
            "player_count": player_count,
            "created_at": now_ms(),
            "started": false,
            "level": 0,
            "total_score": 0,
        },
        "players": players,
    })
}

pub fn role_assignment(role: &str) -> Value {
    json!({ "role": role, "assigned_at": now_ms() })
}

pub fn selection(role: &str, choice: &str) -> Value {
    json!({ "role": role, "choice": choice, "at": now_ms() })
}

pub fn plan_step(author: &str, action: &str, order: usize) -> Value {
    json!({ "author": author, "action": action, "order": order, "at": now_ms() })
}

pub fn report_section(author: &str, section: &str) -> Value {
    json!({
        "author": author,
        "text": format!("{section} drafted by {author}"),
        "at": now_ms(),
    })
}

pub fn badges() -> Value {
    let map: Map<String, Value> = BADGES
        .iter()
        .map(|b| (b.to_string(), json!({ "awarded_at": now_ms() })))
        .collect();
    Value::Object(map)
}
