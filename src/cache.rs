use log::debug;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
const MAX_ENTRIES: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedStudent {
    pub display_name: String,
    pub monthly_fee: f64,
    pub active: bool,
}

#[derive(Debug)]
struct Slot {
    student: CachedStudent,
    fetched_at: Instant,
}

/// Bounded TTL cache of student status, keyed by user id. Avoids re-reading
/// the users table on every attendance write within a session. Every user
/// write must invalidate the entry for that id.
#[derive(Debug)]
pub struct StudentStatusCache {
    ttl: Duration,
    entries: HashMap<String, Slot>,
}

impl StudentStatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, user_id: &str) -> Option<&CachedStudent> {
        let slot = self.entries.get(user_id)?;
        if slot.fetched_at.elapsed() > self.ttl {
            return None;
        }
        Some(&slot.student)
    }

    pub fn put(&mut self, user_id: &str, student: CachedStudent) {
        if self.entries.len() >= MAX_ENTRIES && !self.entries.contains_key(user_id) {
            let ttl = self.ttl;
            self.entries.retain(|_, s| s.fetched_at.elapsed() <= ttl);
            if self.entries.len() >= MAX_ENTRIES {
                debug!("student status cache full, dropping all entries");
                self.entries.clear();
            }
        }
        self.entries.insert(
            user_id.to_string(),
            Slot {
                student,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&mut self, user_id: &str) {
        self.entries.remove(user_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Cached lookup of a student row. Returns None for unknown ids and for
/// users that are not students.
pub fn load_student(
    conn: &Connection,
    cache: &mut StudentStatusCache,
    user_id: &str,
) -> Result<Option<CachedStudent>, rusqlite::Error> {
    if let Some(hit) = cache.get(user_id) {
        return Ok(Some(hit.clone()));
    }
    let row = conn
        .query_row(
            "SELECT display_name, monthly_fee, active FROM users
             WHERE id = ? AND role = 'student'",
            [user_id],
            |r| {
                Ok(CachedStudent {
                    display_name: r.get(0)?,
                    monthly_fee: r.get(1)?,
                    active: r.get::<_, i64>(2)? != 0,
                })
            },
        )
        .optional()?;
    if let Some(ref student) = row {
        cache.put(user_id, student.clone());
    }
    Ok(row)
}
