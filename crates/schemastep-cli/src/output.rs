use schemastep_db::{ApplyOutcome, MigrationKey, MigrationStatus};

/// `showmigrations` listing, grouped by app.
pub fn render_status(status: &[MigrationStatus]) -> String {
    let mut apps: Vec<&str> = status.iter().map(|s| s.key.app_label.as_str()).collect();
    apps.sort_unstable();
    apps.dedup();

    let mut out = String::new();
    for app in apps {
        out.push_str(app);
        out.push('\n');
        for entry in status.iter().filter(|s| s.key.app_label == app) {
            let mark = if entry.is_applied() { 'X' } else { ' ' };
            out.push_str(&format!(" [{mark}] {}\n", entry.key.name));
        }
    }
    if out.is_empty() {
        out.push_str("(no migrations)\n");
    }
    out
}

pub fn render_plan(plan: &[MigrationKey]) -> String {
    if plan.is_empty() {
        return "No planned migration operations.\n".to_string();
    }
    let mut out = String::from("Planned operations:\n");
    for key in plan {
        out.push_str(&format!("  {key}\n"));
    }
    out
}

pub fn render_outcomes(outcomes: &[(MigrationKey, ApplyOutcome)]) -> String {
    if outcomes.is_empty() {
        return "No migrations to apply.\n".to_string();
    }
    let mut out = String::new();
    for (key, outcome) in outcomes {
        let verb = match outcome {
            ApplyOutcome::Applied => "OK",
            ApplyOutcome::AlreadyApplied => "already applied",
            ApplyOutcome::DetectedApplied => "detected as applied",
        };
        out.push_str(&format!("  Applying {key}... {verb}\n"));
    }
    out
}
