//! CLI `compact` command — force a decay-recalculation sweep immediately,
//! in addition to whatever periodic sweep is already scheduled.

use anyhow::Result;

use crate::db::Db;

pub fn compact(db: &Db) -> Result<()> {
    let before = db.stats()?;
    db.compact()?;
    println!("Decay sweep complete ({} node(s) reconsidered).", before.node_count);
    Ok(())
}
