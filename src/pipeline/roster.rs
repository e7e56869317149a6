//! The roster file: one login per line.
//!
//! Blank lines and `#` comments are ignored. A `judge:` or `org:` prefix sets
//! the role. Logins are case-insensitive; the first spelling and position win,
//! while a prefixed line upgrades the role of an earlier plain one.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::domain::{Role, TrackedEntity};
use crate::error::{Result, WallError};

#[derive(Debug, Clone, PartialEq)]
pub struct Roster {
    pub entities: Vec<TrackedEntity>,
}

impl Roster {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| WallError::Config(format!("Failed to read roster {}: {}", path.display(), e)))?;
        let roster = Self::parse(&contents);
        log::info!("Loaded {} entities from {}", roster.entities.len(), path.display());
        Ok(roster)
    }

    pub fn parse(contents: &str) -> Self {
        let mut entities: Vec<TrackedEntity> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for line in contents.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (role, login) = split_role(line);
            if login.is_empty() {
                continue;
            }

            let entity = TrackedEntity::new(login).with_role(role);
            match seen.get(&entity.id()) {
                Some(&index) => {
                    if role != Role::Participant {
                        entities[index].role = role;
                    }
                }
                None => {
                    seen.insert(entity.id(), entities.len());
                    entities.push(entity);
                }
            }
        }

        Self { entities }
    }

    /// Entities whose login matches one of `logins` (case-insensitive); all
    /// of them when `logins` is empty.
    pub fn select(&self, logins: &[String]) -> Vec<TrackedEntity> {
        if logins.is_empty() {
            return self.entities.clone();
        }
        let wanted: Vec<String> = logins.iter().map(|l| l.to_lowercase()).collect();
        self.entities
            .iter()
            .filter(|e| wanted.contains(&e.id()))
            .cloned()
            .collect()
    }
}

fn split_role(line: &str) -> (Role, &str) {
    for role in [Role::Judge, Role::Organizer] {
        if let Some(rest) = role.prefix().and_then(|p| line.strip_prefix(p)) {
            return (role, rest.trim());
        }
    }
    (Role::Participant, line)
}
