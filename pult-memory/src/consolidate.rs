//! Consolidation job over the memory store.
//!
//! Four ordered, individually idempotent phases per owner:
//! 0. remap legacy categories into the fixed taxonomy
//! 1. remove exact duplicates (same scope, category, key and value)
//! 2. merge rows sharing a bare key, keeping the most recently touched one
//! 3. archive stale low-importance rows
//!
//! Runs behind a per-owner cooldown gate. Deletions go by id, so a second
//! pass racing past the cooldown boundary degrades to no-ops instead of
//! corrupting the store.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use pult_core::MemorySettings;
use pult_db::{MemoryCategory, MemoryRepository, MemoryRow};

use crate::cooldown::CooldownGate;
use crate::errors::MemoryResult;

const SECONDS_PER_DAY: i64 = 86_400;

/// Category applied to legacy tags with no mapping.
const FALLBACK_CATEGORY: MemoryCategory = MemoryCategory::Persoenliches;

/// What one consolidation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationCounters {
    pub migrated: u64,
    pub duplicates_removed: u64,
    pub merged: u64,
    pub archived: u64,
}

impl ConsolidationCounters {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }

    fn absorb(&mut self, other: &ConsolidationCounters) {
        self.migrated += other.migrated;
        self.duplicates_removed += other.duplicates_removed;
        self.merged += other.merged;
        self.archived += other.archived;
    }
}

/// Static many-to-one mapping of legacy free-text tags into the taxonomy.
pub fn map_legacy_category(tag: &str) -> Option<MemoryCategory> {
    let normalized = tag.trim().to_lowercase();
    let category = match normalized.as_str() {
        "subject" | "subjects" | "fach" | "faecher" | "topic" | "topics" | "thema" | "themen" => {
            MemoryCategory::FaecherUndThemen
        }
        "class" | "classes" | "klasse" | "klassen" | "student" | "students" | "schueler"
        | "schuelerin" => MemoryCategory::KlassenUndSchueler,
        "pedagogy" | "didaktik" | "methodik" | "teaching_style" | "unterrichtsstil" => {
            MemoryCategory::Paedagogik
        }
        "assessment" | "assessments" | "grading" | "noten" | "pruefung" | "pruefungen"
        | "bewertungen" => MemoryCategory::Bewertung,
        "material" | "materials" | "resources" | "arbeitsblatt" | "arbeitsblaetter" => {
            MemoryCategory::Materialien
        }
        "personal" | "about_me" | "profil" => MemoryCategory::Persoenliches,
        "rueckmeldung" | "kritik" => MemoryCategory::Feedback,
        "curriculum" | "lehrplan" | "curriculum_link" | "lehrplanbezug" => {
            MemoryCategory::Lehrplanbezuege
        }
        _ => return None,
    };
    Some(category)
}

pub struct Consolidator {
    pool: SqlitePool,
    settings: MemorySettings,
    cooldown: CooldownGate,
}

impl Consolidator {
    pub fn new(pool: SqlitePool, settings: MemorySettings) -> Self {
        Self::with_cooldown(pool, settings, CooldownGate::new())
    }

    /// Inject a shared cooldown gate (e.g. one gate across several
    /// consolidator instances).
    pub fn with_cooldown(pool: SqlitePool, settings: MemorySettings, cooldown: CooldownGate) -> Self {
        Self {
            pool,
            settings,
            cooldown,
        }
    }

    /// Consolidate one owner, unless a pass ran within the cooldown window.
    /// Returns `None` when throttled.
    pub async fn consolidate_owner(
        &self,
        owner_id: &str,
    ) -> MemoryResult<Option<ConsolidationCounters>> {
        let ttl = Duration::from_secs(self.settings.consolidation_cooldown_seconds);
        if !self.cooldown.try_begin(owner_id, ttl) {
            debug!(owner = owner_id, "consolidation still cooling down");
            return Ok(None);
        }

        Ok(Some(self.consolidate_owner_now(owner_id).await?))
    }

    /// Consolidate one owner immediately, bypassing the cooldown.
    pub async fn consolidate_owner_now(
        &self,
        owner_id: &str,
    ) -> MemoryResult<ConsolidationCounters> {
        let now = Utc::now().timestamp();
        let mut counters = ConsolidationCounters::default();

        self.migrate_categories(owner_id, &mut counters).await?;
        self.remove_exact_duplicates(owner_id, &mut counters).await?;
        self.merge_same_keys(owner_id, now, &mut counters).await?;
        self.archive_stale(owner_id, now, &mut counters).await?;

        if !counters.is_noop() {
            info!(
                owner = owner_id,
                migrated = counters.migrated,
                duplicates_removed = counters.duplicates_removed,
                merged = counters.merged,
                archived = counters.archived,
                "memory consolidation finished"
            );
        }

        Ok(counters)
    }

    /// Consolidate every owner with at least one memory entry. Per-owner
    /// cooldowns still apply; throttled owners contribute nothing.
    pub async fn consolidate_all(&self) -> MemoryResult<ConsolidationCounters> {
        let mut total = ConsolidationCounters::default();
        for owner_id in MemoryRepository::distinct_owners(&self.pool).await? {
            if let Some(counters) = self.consolidate_owner(&owner_id).await? {
                total.absorb(&counters);
            }
        }
        Ok(total)
    }

    /// Phase 0: remap categories outside the taxonomy. When the remap would
    /// collide with an existing identity, the colliding row is deleted
    /// instead of erroring.
    async fn migrate_categories(
        &self,
        owner_id: &str,
        counters: &mut ConsolidationCounters,
    ) -> MemoryResult<()> {
        let rows = MemoryRepository::list_raw_for_owner(&self.pool, owner_id).await?;

        for row in rows {
            if row.category.parse::<MemoryCategory>().is_ok() {
                continue;
            }

            let target = map_legacy_category(&row.category).unwrap_or_else(|| {
                warn!(
                    category = %row.category,
                    key = %row.key,
                    "unmapped legacy category, falling back to {}",
                    FALLBACK_CATEGORY
                );
                FALLBACK_CATEGORY
            });

            let colliding: Option<(String,)> = sqlx::query_as(
                "SELECT id FROM memories
                 WHERE owner_id = ? AND scope = ? AND category = ? AND key = ? AND id != ?",
            )
            .bind(owner_id)
            .bind(&row.scope)
            .bind(target.as_str())
            .bind(&row.key)
            .bind(&row.id)
            .fetch_optional(&self.pool)
            .await?;

            if colliding.is_some() {
                // the remap target identity already exists; the colliding
                // row loses
                MemoryRepository::delete_ids(&self.pool, owner_id, &[row.id.clone()]).await?;
            } else {
                MemoryRepository::set_category(&self.pool, &row.id, target).await?;
            }
            counters.migrated += 1;
        }

        Ok(())
    }

    /// Phase 1: within each (scope, category, key, value) fingerprint group
    /// keep the most recently created row.
    async fn remove_exact_duplicates(
        &self,
        owner_id: &str,
        counters: &mut ConsolidationCounters,
    ) -> MemoryResult<()> {
        let rows = MemoryRepository::list_raw_for_owner(&self.pool, owner_id).await?;

        let mut groups: HashMap<(String, String, String, String), Vec<MemoryRow>> = HashMap::new();
        for row in rows {
            groups
                .entry((
                    row.scope.clone(),
                    row.category.clone(),
                    row.key.clone(),
                    row.value.clone(),
                ))
                .or_default()
                .push(row);
        }

        for (_, mut group) in groups {
            if group.len() < 2 {
                continue;
            }
            group.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            let losers: Vec<String> = group[1..].iter().map(|row| row.id.clone()).collect();
            counters.duplicates_removed +=
                MemoryRepository::delete_ids(&self.pool, owner_id, &losers).await?;
        }

        Ok(())
    }

    /// Phase 2: merge rows sharing a bare key (categories may have drifted
    /// historically). The most recently touched row survives and its
    /// importance is raised to the group maximum.
    async fn merge_same_keys(
        &self,
        owner_id: &str,
        now: i64,
        counters: &mut ConsolidationCounters,
    ) -> MemoryResult<()> {
        let rows = MemoryRepository::list_raw_for_owner(&self.pool, owner_id).await?;

        let mut groups: HashMap<String, Vec<MemoryRow>> = HashMap::new();
        for row in rows {
            groups.entry(row.key.clone()).or_default().push(row);
        }

        for (_, mut group) in groups {
            if group.len() < 2 {
                continue;
            }
            group.sort_by(|a, b| {
                b.last_touch()
                    .cmp(&a.last_touch())
                    .then(b.created_at.cmp(&a.created_at))
                    .then(b.id.cmp(&a.id))
            });

            let keeper = &group[0];
            let group_max = group
                .iter()
                .map(|row| row.importance)
                .fold(f64::NEG_INFINITY, f64::max);

            let losers: Vec<String> = group[1..].iter().map(|row| row.id.clone()).collect();
            counters.merged += MemoryRepository::delete_ids(&self.pool, owner_id, &losers).await?;

            // never lowered, and the keeper's updated_at is refreshed
            MemoryRepository::raise_importance(
                &self.pool,
                &keeper.id,
                keeper.importance.max(group_max),
                now,
            )
            .await?;
        }

        Ok(())
    }

    /// Phase 3: delete low-importance rows whose last touch is older than
    /// their decay window (default 90 days).
    async fn archive_stale(
        &self,
        owner_id: &str,
        now: i64,
        counters: &mut ConsolidationCounters,
    ) -> MemoryResult<()> {
        let rows = MemoryRepository::list_raw_for_owner(&self.pool, owner_id).await?;

        let mut stale: Vec<String> = Vec::new();
        for row in rows {
            if row.importance >= self.settings.archive_min_importance {
                continue;
            }
            let window_days = row.decay_days.unwrap_or(self.settings.archive_after_days);
            if now - row.last_touch() > window_days * SECONDS_PER_DAY {
                stale.push(row.id);
            }
        }

        counters.archived += MemoryRepository::delete_ids(&self.pool, owner_id, &stale).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pult_db::test_helpers::create_test_pool;

    #[allow(clippy::too_many_arguments)]
    async fn insert_raw(
        pool: &SqlitePool,
        id: &str,
        owner: &str,
        scope: &str,
        category: &str,
        key: &str,
        value: &str,
        importance: f64,
        created_at: i64,
        updated_at: i64,
    ) {
        sqlx::query(
            "INSERT INTO memories (id, owner_id, scope, category, key, value, importance, source, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 'inferred', ?, ?)",
        )
        .bind(id)
        .bind(owner)
        .bind(scope)
        .bind(category)
        .bind(key)
        .bind(value)
        .bind(importance)
        .bind(created_at)
        .bind(updated_at)
        .execute(pool)
        .await
        .unwrap();
    }

    fn consolidator(pool: &SqlitePool) -> Consolidator {
        Consolidator::new(pool.clone(), MemorySettings::default())
    }

    #[tokio::test]
    async fn test_phase0_remaps_legacy_category() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let now = Utc::now().timestamp();

        insert_raw(
            pool, "mem_1", "t1", "self", "subject", "Lieblingsfach", "Physik", 0.7, now, now,
        )
        .await;

        let counters = consolidator(pool).consolidate_owner_now("t1").await.unwrap();
        assert_eq!(counters.migrated, 1);
        assert_eq!(counters.duplicates_removed, 0);
        assert_eq!(counters.merged, 0);
        assert_eq!(counters.archived, 0);

        let entries = MemoryRepository::list_for_owner(pool, "t1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].category, MemoryCategory::FaecherUndThemen);
        assert_eq!(entries[0].value, "Physik");
    }

    #[tokio::test]
    async fn test_phase0_collision_deletes_colliding_row() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let now = Utc::now().timestamp();

        insert_raw(
            pool,
            "mem_valid",
            "t1",
            "self",
            "faecher_und_themen",
            "Lieblingsfach",
            "Mathe",
            0.8,
            now - 100,
            now - 100,
        )
        .await;
        insert_raw(
            pool, "mem_legacy", "t1", "self", "subject", "Lieblingsfach", "Physik", 0.5, now, now,
        )
        .await;

        let counters = consolidator(pool).consolidate_owner_now("t1").await.unwrap();
        assert_eq!(counters.migrated, 1);

        // no duplicate identity was created; the already-valid row survives
        let entries = MemoryRepository::list_for_owner(pool, "t1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "mem_valid");
        assert_eq!(entries[0].value, "Mathe");
    }

    #[tokio::test]
    async fn test_phase0_unmapped_tag_falls_back_to_default() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let now = Utc::now().timestamp();

        insert_raw(
            pool, "mem_1", "t1", "self", "sonstiges_zeug", "Notiz", "irgendwas", 0.6, now, now,
        )
        .await;

        consolidator(pool).consolidate_owner_now("t1").await.unwrap();

        let entries = MemoryRepository::list_for_owner(pool, "t1").await.unwrap();
        assert_eq!(entries[0].category, MemoryCategory::Persoenliches);
    }

    #[tokio::test]
    async fn test_phase1_removes_exact_duplicates() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let now = Utc::now().timestamp();

        // simulate a store imported from the legacy system without the
        // identity index
        sqlx::query("DROP INDEX idx_memories_identity")
            .execute(pool)
            .await
            .unwrap();

        insert_raw(
            pool, "mem_old", "t1", "self", "persoenliches", "Kaffee", "schwarz", 0.4,
            now - 1000, now - 1000,
        )
        .await;
        insert_raw(
            pool, "mem_new", "t1", "self", "persoenliches", "Kaffee", "schwarz", 0.4, now, now,
        )
        .await;

        let counters = consolidator(pool).consolidate_owner_now("t1").await.unwrap();
        assert_eq!(counters.duplicates_removed, 1);

        let rows = MemoryRepository::list_raw_for_owner(pool, "t1").await.unwrap();
        assert_eq!(rows.len(), 1);
        // the most recently created row is kept
        assert_eq!(rows[0].id, "mem_new");
    }

    #[tokio::test]
    async fn test_phase2_merges_same_key_and_raises_importance() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let now = Utc::now().timestamp();

        insert_raw(
            pool,
            "mem_old_important",
            "t1",
            "self",
            "faecher_und_themen",
            "Unterrichtsstil",
            "frontal",
            0.9,
            now - 5000,
            now - 5000,
        )
        .await;
        insert_raw(
            pool,
            "mem_recent",
            "t1",
            "self",
            "paedagogik",
            "Unterrichtsstil",
            "offene Lernformen",
            0.4,
            now - 10,
            now - 10,
        )
        .await;

        let counters = consolidator(pool).consolidate_owner_now("t1").await.unwrap();
        assert_eq!(counters.merged, 1);

        let entries = MemoryRepository::list_for_owner(pool, "t1").await.unwrap();
        assert_eq!(entries.len(), 1);
        let keeper = &entries[0];
        assert_eq!(keeper.id, "mem_recent");
        assert_eq!(keeper.value, "offene Lernformen");
        // raised to the group maximum, never lowered
        assert!((keeper.importance - 0.9).abs() < f64::EPSILON);
        assert!(keeper.updated_at >= now);
    }

    #[tokio::test]
    async fn test_phase3_archives_stale_low_importance_rows() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let now = Utc::now().timestamp();
        let days = |n: i64| now - n * SECONDS_PER_DAY;

        insert_raw(
            pool, "mem_stale", "t1", "self", "persoenliches", "Altlast", "vergessen", 0.3,
            days(120), days(120),
        )
        .await;
        insert_raw(
            pool, "mem_fresh", "t1", "self", "persoenliches", "Aktuell", "behalten", 0.3,
            days(10), days(10),
        )
        .await;
        insert_raw(
            pool, "mem_important", "t1", "self", "persoenliches", "Wichtig", "behalten", 0.8,
            days(400), days(400),
        )
        .await;

        let counters = consolidator(pool).consolidate_owner_now("t1").await.unwrap();
        assert_eq!(counters.archived, 1);

        let rows = MemoryRepository::list_raw_for_owner(pool, "t1").await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|row| row.id.as_str()).collect();
        assert!(!ids.contains(&"mem_stale"));
        assert!(ids.contains(&"mem_fresh"));
        assert!(ids.contains(&"mem_important"));
    }

    #[tokio::test]
    async fn test_phase3_honors_decay_window_override() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let now = Utc::now().timestamp();
        let touched = now - 40 * SECONDS_PER_DAY;

        sqlx::query(
            "INSERT INTO memories (id, owner_id, scope, category, key, value, importance, source, decay_days, created_at, updated_at)
             VALUES ('mem_decay', 't1', 'self', 'persoenliches', 'Kurzlebig', 'weg damit', 0.2, 'inferred', 30, ?, ?)",
        )
        .bind(touched)
        .bind(touched)
        .execute(pool)
        .await
        .unwrap();

        let counters = consolidator(pool).consolidate_owner_now("t1").await.unwrap();
        // 40 days old with a 30-day decay window: archived despite the
        // 90-day default
        assert_eq!(counters.archived, 1);
    }

    #[tokio::test]
    async fn test_second_run_is_a_noop() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let now = Utc::now().timestamp();
        let days = |n: i64| now - n * SECONDS_PER_DAY;

        insert_raw(
            pool, "mem_1", "t1", "self", "subject", "Lieblingsfach", "Physik", 0.7,
            days(200), days(200),
        )
        .await;
        insert_raw(
            pool, "mem_2", "t1", "self", "paedagogik", "Lieblingsfach", "Mathe", 0.4,
            days(1), days(1),
        )
        .await;
        insert_raw(
            pool, "mem_3", "t1", "self", "persoenliches", "Altlast", "alt", 0.2,
            days(150), days(150),
        )
        .await;

        let job = consolidator(pool);
        let first = job.consolidate_owner_now("t1").await.unwrap();
        assert!(!first.is_noop());

        let second = job.consolidate_owner_now("t1").await.unwrap();
        assert_eq!(second, ConsolidationCounters::default());
    }

    #[tokio::test]
    async fn test_cooldown_throttles_repeated_triggers() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let now = Utc::now().timestamp();

        insert_raw(
            pool, "mem_1", "t1", "self", "subject", "Lieblingsfach", "Physik", 0.7, now, now,
        )
        .await;

        let job = consolidator(pool);
        let first = job.consolidate_owner("t1").await.unwrap();
        assert!(first.is_some());

        let second = job.consolidate_owner("t1").await.unwrap();
        assert!(second.is_none(), "second trigger inside cooldown must be skipped");
    }

    #[tokio::test]
    async fn test_consolidate_all_covers_every_owner() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();
        let now = Utc::now().timestamp();

        insert_raw(
            pool, "mem_a", "t1", "self", "subject", "Lieblingsfach", "Physik", 0.7, now, now,
        )
        .await;
        insert_raw(
            pool, "mem_b", "t2", "self", "klasse", "Klasse 7b", "28 Kinder", 0.6, now, now,
        )
        .await;

        let totals = consolidator(pool).consolidate_all().await.unwrap();
        assert_eq!(totals.migrated, 2);

        for owner in ["t1", "t2"] {
            let entries = MemoryRepository::list_for_owner(pool, owner).await.unwrap();
            assert_eq!(entries.len(), 1);
        }
    }

    #[test]
    fn test_legacy_map_is_many_to_one() {
        assert_eq!(
            map_legacy_category("subject"),
            Some(MemoryCategory::FaecherUndThemen)
        );
        assert_eq!(
            map_legacy_category("fach"),
            Some(MemoryCategory::FaecherUndThemen)
        );
        assert_eq!(
            map_legacy_category("klasse"),
            Some(MemoryCategory::KlassenUndSchueler)
        );
        assert_eq!(map_legacy_category("völlig_unbekannt"), None);
    }
}
