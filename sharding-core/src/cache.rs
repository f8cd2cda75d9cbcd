//! Statement shapes known to need no rewriting. Entries are only ever added,
//! a rule id is never reused so they cannot go stale.

use dashmap::DashMap;
use log::debug;

lazy_static! {
    static ref REWRITE_SHAPES: DashMap<(u64, String), bool> = DashMap::new();
}

/// Whether `sql` under rule `rule_id` needs token generation, computing it
/// with `f` on first sight.
pub fn needs_rewrite<F>(rule_id: u64, sql: &str, f: F) -> bool
where
    F: FnOnce() -> bool,
{
    let key = (rule_id, sql.to_string());
    if let Some(needs) = REWRITE_SHAPES.get(&key) {
        return *needs;
    }
    let needs = f();
    debug!("rule {} caches rewrite flag {} for `{}`", rule_id, needs, sql);
    REWRITE_SHAPES.insert(key, needs);
    needs
}

pub fn cached(rule_id: u64, sql: &str) -> Option<bool> {
    REWRITE_SHAPES.get(&(rule_id, sql.to_string())).map(|needs| *needs)
}
