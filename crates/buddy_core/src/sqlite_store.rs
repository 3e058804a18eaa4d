/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::model::{
    AggregateDoc, AggregateKey, Comment, CommitOutcome, FeedScoreRecord, Item, ItemCounters,
    ReactionType, UserProfile, Versioned, Visibility,
};
use crate::store::{
    DocumentStore, EngagementDoc, EngagementWrite, ItemFilter, ItemQuery, ReactionWrite,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ITEM_COLUMNS: &str = "id, author_id, community_tag, visibility, created_at_ms, tags_json, content, like_count, comment_count, share_count, reactions_json";

#[derive(Clone)]
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let conn = Connection::open(&path).with_context(|| format!("open db: {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS items (
              id TEXT PRIMARY KEY,
              author_id TEXT NOT NULL,
              community_tag TEXT NULL,
              visibility TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              tags_json TEXT NOT NULL,
              content TEXT NOT NULL,
              like_count INTEGER NOT NULL DEFAULT 0,
              comment_count INTEGER NOT NULL DEFAULT 0,
              share_count INTEGER NOT NULL DEFAULT 0,
              reactions_json TEXT NOT NULL DEFAULT '{}',
              version INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_items_vis_created ON items(visibility, created_at_ms DESC);
            CREATE INDEX IF NOT EXISTS idx_items_community_created ON items(community_tag, created_at_ms DESC);
            CREATE INDEX IF NOT EXISTS idx_items_author_created ON items(author_id, created_at_ms DESC);

            CREATE TABLE IF NOT EXISTS reactions (
              item_id TEXT NOT NULL,
              user_id TEXT NOT NULL,
              type TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              PRIMARY KEY(item_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS comments (
              id TEXT PRIMARY KEY,
              item_id TEXT NOT NULL,
              parent_id TEXT NULL,
              author_id TEXT NOT NULL,
              text TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_comments_item_created ON comments(item_id, created_at_ms ASC);

            CREATE TABLE IF NOT EXISTS profiles (
              user_id TEXT PRIMARY KEY,
              skills_json TEXT NOT NULL,
              hobbies_json TEXT NOT NULL,
              friends_json TEXT NOT NULL,
              utc_offset_minutes INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS feed_scores (
              user_id TEXT NOT NULL,
              item_id TEXT NOT NULL,
              community_id TEXT NULL,
              score REAL NOT NULL,
              kind TEXT NOT NULL,
              PRIMARY KEY(user_id, item_id)
            );
            CREATE INDEX IF NOT EXISTS idx_feed_scores_user_score ON feed_scores(user_id, score DESC);

            CREATE TABLE IF NOT EXISTS aggregates (
              key TEXT PRIMARY KEY,
              count INTEGER NOT NULL,
              mean REAL NOT NULL,
              updated_at_ms INTEGER NOT NULL,
              version INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            path,
            busy_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` on a fresh connection off the async runtime.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking({
            let path = self.path.clone();
            let busy = self.busy_timeout;
            move || -> Result<T> {
                let mut conn = Connection::open(&path)
                    .with_context(|| format!("open db: {}", path.display()))?;
                conn.busy_timeout(busy)?;
                f(&mut conn)
            }
        })
        .await?
    }
}

fn item_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<(Item, String, String)> {
    let visibility: String = r.get(3)?;
    let tags_json: String = r.get(5)?;
    let reactions_json: String = r.get(10)?;
    let item = Item {
        id: r.get(0)?,
        author_id: r.get(1)?,
        community_tag: r.get(2)?,
        visibility: Visibility::parse(&visibility).unwrap_or(Visibility::Public),
        created_at_ms: r.get(4)?,
        tags: BTreeSet::new(),
        content: r.get(6)?,
        counters: ItemCounters {
            like_count: r.get::<_, i64>(7)?.max(0) as u64,
            comment_count: r.get::<_, i64>(8)?.max(0) as u64,
            share_count: r.get::<_, i64>(9)?.max(0) as u64,
            reaction_counts: BTreeMap::new(),
        },
    };
    Ok((item, tags_json, reactions_json))
}

fn finish_item((mut item, tags_json, reactions_json): (Item, String, String)) -> Result<Item> {
    item.tags = serde_json::from_str(&tags_json).context("decode item tags")?;
    item.counters.reaction_counts =
        serde_json::from_str(&reactions_json).context("decode reaction counts")?;
    Ok(item)
}

fn collect_items(
    conn: &Connection,
    sql: &str,
    values: Vec<rusqlite::types::Value>,
) -> Result<Vec<Item>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(values), item_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(finish_item(row?)?);
    }
    Ok(out)
}

fn profile_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String, i32)> {
    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
}

fn finish_profile(
    (user_id, skills, hobbies, friends, utc_offset_minutes): (String, String, String, String, i32),
) -> Result<UserProfile> {
    Ok(UserProfile {
        user_id,
        skills: serde_json::from_str(&skills).context("decode skills")?,
        hobbies: serde_json::from_str(&hobbies).context("decode hobbies")?,
        friends: serde_json::from_str(&friends).context("decode friends")?,
        utc_offset_minutes,
    })
}

fn load_profile(conn: &Connection, user_id: &str) -> Result<Option<UserProfile>> {
    let row = conn
        .query_row(
            "SELECT user_id, skills_json, hobbies_json, friends_json, utc_offset_minutes FROM profiles WHERE user_id=?1",
            params![user_id],
            profile_from_row,
        )
        .optional()?;
    row.map(finish_profile).transpose()
}

fn store_friends(conn: &Connection, user_id: &str, friends: &BTreeSet<String>) -> Result<()> {
    conn.execute(
        "UPDATE profiles SET friends_json=?2 WHERE user_id=?1",
        params![user_id, serde_json::to_string(friends)?],
    )?;
    Ok(())
}

fn placeholders(start: usize, n: usize) -> String {
    (start..start + n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn health_check(&self) -> Result<()> {
        self.run(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    async fn insert_item(&self, item: &Item) -> Result<()> {
        let item = item.clone();
        self.run(move |conn| {
            conn.execute(
                r#"
                INSERT INTO items(id, author_id, community_tag, visibility, created_at_ms, tags_json, content,
                                  like_count, comment_count, share_count, reactions_json, version)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1)
                "#,
                params![
                    item.id,
                    item.author_id,
                    item.community_tag,
                    item.visibility.as_str(),
                    item.created_at_ms,
                    serde_json::to_string(&item.tags)?,
                    item.content,
                    item.counters.like_count as i64,
                    item.counters.comment_count as i64,
                    item.counters.share_count as i64,
                    serde_json::to_string(&item.counters.reaction_counts)?,
                ],
            )
            .with_context(|| format!("insert item {}", item.id))?;
            Ok(())
        })
        .await
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<Item>> {
        let item_id = item_id.to_string();
        self.run(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id=?1"),
                    params![item_id],
                    item_from_row,
                )
                .optional()?;
            row.map(finish_item).transpose()
        })
        .await
    }

    async fn get_items(&self, item_ids: &[String]) -> Result<Vec<Item>> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = item_ids.to_vec();
        self.run(move |conn| {
            let sql = format!(
                "SELECT {ITEM_COLUMNS} FROM items WHERE id IN ({})",
                placeholders(1, ids.len())
            );
            let values = ids.into_iter().map(Into::into).collect();
            collect_items(conn, &sql, values)
        })
        .await
    }

    async fn delete_item(&self, item_id: &str) -> Result<bool> {
        let item_id = item_id.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let n = tx.execute("DELETE FROM items WHERE id=?1", params![item_id])?;
            tx.execute("DELETE FROM reactions WHERE item_id=?1", params![item_id])?;
            tx.execute("DELETE FROM comments WHERE item_id=?1", params![item_id])?;
            tx.execute("DELETE FROM feed_scores WHERE item_id=?1", params![item_id])?;
            tx.commit()?;
            Ok(n > 0)
        })
        .await
    }

    async fn query_items(&self, query: &ItemQuery) -> Result<Vec<Item>> {
        query.validate()?;
        let query = query.clone();
        self.run(move |conn| {
            let mut values: Vec<rusqlite::types::Value> = Vec::new();
            let mut clause = match &query.filter {
                ItemFilter::Public => "visibility='public'".to_string(),
                ItemFilter::Community(c) => {
                    values.push(c.clone().into());
                    "visibility='community' AND community_tag=?1".to_string()
                }
                ItemFilter::AuthorIn(authors) => {
                    let list = placeholders(1, authors.len());
                    values.extend(authors.iter().cloned().map(Into::into));
                    format!("author_id IN ({list})")
                }
            };
            if let Some(after) = &query.after {
                values.push(after.created_at_ms.into());
                let at = values.len();
                values.push(after.id.clone().into());
                clause.push_str(&format!(
                    " AND (created_at_ms < ?{at} OR (created_at_ms = ?{at} AND id > ?{}))",
                    values.len()
                ));
            }
            values.push((query.limit as i64).into());
            let sql = format!(
                "SELECT {ITEM_COLUMNS} FROM items WHERE {clause} ORDER BY created_at_ms DESC, id ASC LIMIT ?{}",
                values.len()
            );
            collect_items(conn, &sql, values)
        })
        .await
    }

    async fn load_engagement(
        &self,
        item_id: &str,
        user_id: Option<&str>,
    ) -> Result<Option<EngagementDoc>> {
        let item_id = item_id.to_string();
        let user_id = user_id.map(|u| u.to_string());
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let row: Option<(i64, i64, i64, String, i64)> = tx
                .query_row(
                    "SELECT like_count, comment_count, share_count, reactions_json, version FROM items WHERE id=?1",
                    params![item_id],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
                )
                .optional()?;
            let Some((likes, comments, shares, reactions_json, version)) = row else {
                return Ok(None);
            };
            let user_reaction = match &user_id {
                Some(u) => tx
                    .query_row(
                        "SELECT type FROM reactions WHERE item_id=?1 AND user_id=?2",
                        params![item_id, u],
                        |r| r.get::<_, String>(0),
                    )
                    .optional()?
                    .and_then(|t| ReactionType::parse(&t)),
                None => None,
            };
            tx.commit()?;
            Ok(Some(EngagementDoc {
                version: version.max(0) as u64,
                counters: ItemCounters {
                    like_count: likes.max(0) as u64,
                    comment_count: comments.max(0) as u64,
                    share_count: shares.max(0) as u64,
                    reaction_counts: serde_json::from_str(&reactions_json)
                        .context("decode reaction counts")?,
                },
                user_reaction,
            }))
        })
        .await
    }

    async fn commit_engagement(
        &self,
        item_id: &str,
        expected_version: u64,
        write: &EngagementWrite,
    ) -> Result<CommitOutcome> {
        let item_id = item_id.to_string();
        let write = write.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let c = &write.counters;
            let updated = tx.execute(
                r#"
                UPDATE items SET like_count=?3, comment_count=?4, share_count=?5, reactions_json=?6, version=version+1
                WHERE id=?1 AND version=?2
                "#,
                params![
                    item_id,
                    expected_version as i64,
                    c.like_count as i64,
                    c.comment_count as i64,
                    c.share_count as i64,
                    serde_json::to_string(&c.reaction_counts)?,
                ],
            )?;
            if updated == 0 {
                // dropping the transaction rolls it back
                return Ok(CommitOutcome::Stale);
            }
            match &write.reaction {
                Some(ReactionWrite::Put {
                    user_id,
                    reaction,
                    at_ms,
                }) => {
                    tx.execute(
                        r#"
                        INSERT INTO reactions(item_id, user_id, type, created_at_ms) VALUES (?1, ?2, ?3, ?4)
                        ON CONFLICT(item_id, user_id) DO UPDATE SET type=excluded.type, created_at_ms=excluded.created_at_ms
                        "#,
                        params![item_id, user_id, reaction.as_str(), at_ms],
                    )?;
                }
                Some(ReactionWrite::Delete { user_id }) => {
                    tx.execute(
                        "DELETE FROM reactions WHERE item_id=?1 AND user_id=?2",
                        params![item_id, user_id],
                    )?;
                }
                None => {}
            }
            if let Some(cm) = &write.comment {
                tx.execute(
                    "INSERT INTO comments(id, item_id, parent_id, author_id, text, created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![cm.id, cm.item_id, cm.parent_id, cm.author_id, cm.text, cm.created_at_ms],
                )?;
            }
            tx.commit()?;
            Ok(CommitOutcome::Committed)
        })
        .await
    }

    async fn get_comment(&self, item_id: &str, comment_id: &str) -> Result<Option<Comment>> {
        let item_id = item_id.to_string();
        let comment_id = comment_id.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, item_id, parent_id, author_id, text, created_at_ms FROM comments WHERE id=?1 AND item_id=?2",
                    params![comment_id, item_id],
                    |r| {
                        Ok(Comment {
                            id: r.get(0)?,
                            item_id: r.get(1)?,
                            parent_id: r.get(2)?,
                            author_id: r.get(3)?,
                            text: r.get(4)?,
                            created_at_ms: r.get(5)?,
                        })
                    },
                )
                .optional()?)
        })
        .await
    }

    async fn list_comments(&self, item_id: &str, limit: u32) -> Result<Vec<Comment>> {
        let item_id = item_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, item_id, parent_id, author_id, text, created_at_ms
                FROM comments WHERE item_id=?1
                ORDER BY created_at_ms ASC, id ASC
                LIMIT ?2
                "#,
            )?;
            let mut rows = stmt.query(params![item_id, limit as i64])?;
            let mut out = Vec::new();
            while let Some(r) = rows.next()? {
                out.push(Comment {
                    id: r.get(0)?,
                    item_id: r.get(1)?,
                    parent_id: r.get(2)?,
                    author_id: r.get(3)?,
                    text: r.get(4)?,
                    created_at_ms: r.get(5)?,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let user_id = user_id.to_string();
        self.run(move |conn| load_profile(conn, &user_id)).await
    }

    async fn get_profiles(&self, user_ids: &[String]) -> Result<Vec<UserProfile>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = user_ids.to_vec();
        self.run(move |conn| {
            let sql = format!(
                "SELECT user_id, skills_json, hobbies_json, friends_json, utc_offset_minutes FROM profiles WHERE user_id IN ({})",
                placeholders(1, ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(ids), profile_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(finish_profile(row?)?);
            }
            Ok(out)
        })
        .await
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<()> {
        let p = profile.clone();
        self.run(move |conn| {
            conn.execute(
                r#"
                INSERT INTO profiles(user_id, skills_json, hobbies_json, friends_json, utc_offset_minutes)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(user_id) DO UPDATE SET
                  skills_json=excluded.skills_json,
                  hobbies_json=excluded.hobbies_json,
                  friends_json=excluded.friends_json,
                  utc_offset_minutes=excluded.utc_offset_minutes
                "#,
                params![
                    p.user_id,
                    serde_json::to_string(&p.skills)?,
                    serde_json::to_string(&p.hobbies)?,
                    serde_json::to_string(&p.friends)?,
                    p.utc_offset_minutes,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn link_friends(&self, a: &str, b: &str) -> Result<()> {
        let (a, b) = (a.to_string(), b.to_string());
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut pa = load_profile(&tx, &a)?.ok_or_else(|| anyhow!("profile missing: {a}"))?;
            let mut pb = load_profile(&tx, &b)?.ok_or_else(|| anyhow!("profile missing: {b}"))?;
            pa.friends.insert(b.clone());
            pb.friends.insert(a.clone());
            store_friends(&tx, &a, &pa.friends)?;
            store_friends(&tx, &b, &pb.friends)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn unlink_friends(&self, a: &str, b: &str) -> Result<()> {
        let (a, b) = (a.to_string(), b.to_string());
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if let Some(mut pa) = load_profile(&tx, &a)? {
                pa.friends.remove(&b);
                store_friends(&tx, &a, &pa.friends)?;
            }
            if let Some(mut pb) = load_profile(&tx, &b)? {
                pb.friends.remove(&a);
                store_friends(&tx, &b, &pb.friends)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn top_feed_scores(
        &self,
        user_id: &str,
        community_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<FeedScoreRecord>> {
        let user_id = user_id.to_string();
        let community_id = community_id.map(|c| c.to_string());
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT user_id, item_id, community_id, score, kind FROM feed_scores
                WHERE user_id=?1 AND (?2 IS NULL OR community_id=?2)
                ORDER BY score DESC, item_id ASC
                LIMIT ?3
                "#,
            )?;
            let mut rows = stmt.query(params![user_id, community_id, limit as i64])?;
            let mut out = Vec::new();
            while let Some(r) = rows.next()? {
                out.push(FeedScoreRecord {
                    user_id: r.get(0)?,
                    item_id: r.get(1)?,
                    community_id: r.get(2)?,
                    score: r.get(3)?,
                    kind: r.get(4)?,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn upsert_feed_scores(&self, records: &[FeedScoreRecord]) -> Result<()> {
        let records = records.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            for r in &records {
                tx.execute(
                    r#"
                    INSERT INTO feed_scores(user_id, item_id, community_id, score, kind) VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(user_id, item_id) DO UPDATE SET
                      community_id=excluded.community_id, score=excluded.score, kind=excluded.kind
                    "#,
                    params![r.user_id, r.item_id, r.community_id, r.score, r.kind],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn load_aggregate(&self, key: &AggregateKey) -> Result<Versioned<AggregateDoc>> {
        let key = key.as_str().to_string();
        self.run(move |conn| {
            let row: Option<(i64, f64, i64, i64)> = conn
                .query_row(
                    "SELECT count, mean, updated_at_ms, version FROM aggregates WHERE key=?1",
                    params![key],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
                )
                .optional()?;
            Ok(match row {
                Some((count, mean, updated_at_ms, version)) => Versioned {
                    version: version.max(0) as u64,
                    value: AggregateDoc {
                        count,
                        mean,
                        updated_at_ms,
                    },
                },
                None => Versioned {
                    version: 0,
                    value: AggregateDoc::default(),
                },
            })
        })
        .await
    }

    async fn commit_aggregate(
        &self,
        key: &AggregateKey,
        expected_version: u64,
        doc: &AggregateDoc,
    ) -> Result<CommitOutcome> {
        let key = key.as_str().to_string();
        let doc = *doc;
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let changed = if expected_version == 0 {
                tx.execute(
                    "INSERT OR IGNORE INTO aggregates(key, count, mean, updated_at_ms, version) VALUES (?1, ?2, ?3, ?4, 1)",
                    params![key, doc.count, doc.mean, doc.updated_at_ms],
                )?
            } else {
                tx.execute(
                    "UPDATE aggregates SET count=?3, mean=?4, updated_at_ms=?5, version=version+1 WHERE key=?1 AND version=?2",
                    params![key, expected_version as i64, doc.count, doc.mean, doc.updated_at_ms],
                )?
            };
            if changed == 0 {
                return Ok(CommitOutcome::Stale);
            }
            tx.commit()?;
            Ok(CommitOutcome::Committed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FeedCursor;

    fn cursor(ms: i64, id: &str) -> FeedCursor {
        FeedCursor {
            created_at_ms: ms,
            id: id.to_string(),
        }
    }

    fn open_temp() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("buddy.db")).unwrap();
        (dir, store)
    }

    fn item(id: &str, author: &str, vis: Visibility, community: Option<&str>, at: i64) -> Item {
        Item {
            id: id.to_string(),
            author_id: author.to_string(),
            community_tag: community.map(|c| c.to_string()),
            visibility: vis,
            created_at_ms: at,
            tags: ["rust".to_string()].into_iter().collect(),
            content: format!("post {id}"),
            counters: ItemCounters::default(),
        }
    }

    #[tokio::test]
    async fn items_round_trip_through_tier_queries() {
        let (_dir, store) = open_temp();
        store
            .insert_item(&item("p1", "a", Visibility::Public, None, 10))
            .await
            .unwrap();
        store
            .insert_item(&item("p2", "b", Visibility::Community, Some("mit"), 20))
            .await
            .unwrap();
        store
            .insert_item(&item("p3", "c", Visibility::Friends, None, 30))
            .await
            .unwrap();
        store
            .insert_item(&item("p4", "a", Visibility::Public, None, 40))
            .await
            .unwrap();

        let public = store.query_items(&ItemQuery::public(10, None)).await.unwrap();
        let ids: Vec<_> = public.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["p4", "p1"]);
        assert!(public[0].tags.contains("rust"));

        let older = store
            .query_items(&ItemQuery::public(10, Some(&cursor(40, "p4"))))
            .await
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].id, "p1");

        let community = store
            .query_items(&ItemQuery::community("mit", 10, None))
            .await
            .unwrap();
        assert_eq!(community.len(), 1);
        assert_eq!(community[0].id, "p2");

        let authors = vec!["a".to_string(), "c".to_string()];
        let by_authors = store
            .query_items(&ItemQuery::authored_by(&authors, 2, Some(&cursor(100, ""))))
            .await
            .unwrap();
        let ids: Vec<_> = by_authors.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["p4", "p3"]);
    }

    #[tokio::test]
    async fn cursor_breaks_timestamp_ties_by_id() {
        let (_dir, store) = open_temp();
        for id in ["a", "b", "c"] {
            store
                .insert_item(&item(id, "x", Visibility::Public, None, 100))
                .await
                .unwrap();
        }
        store
            .insert_item(&item("d", "x", Visibility::Public, None, 99))
            .await
            .unwrap();

        let rest = store
            .query_items(&ItemQuery::public(10, Some(&cursor(100, "b"))))
            .await
            .unwrap();
        let ids: Vec<_> = rest.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn engagement_commit_is_versioned_and_atomic() {
        let (_dir, store) = open_temp();
        store
            .insert_item(&item("p1", "a", Visibility::Public, None, 10))
            .await
            .unwrap();
        let doc = store.load_engagement("p1", Some("u1")).await.unwrap().unwrap();
        assert_eq!(doc.user_reaction, None);

        let mut counters = doc.counters.clone();
        counters.apply_reaction_change(None, Some(ReactionType::Like));
        let write = EngagementWrite {
            counters,
            reaction: Some(ReactionWrite::Put {
                user_id: "u1".to_string(),
                reaction: ReactionType::Like,
                at_ms: 11,
            }),
            comment: None,
        };
        assert_eq!(
            store.commit_engagement("p1", doc.version, &write).await.unwrap(),
            CommitOutcome::Committed
        );
        assert_eq!(
            store.commit_engagement("p1", doc.version, &write).await.unwrap(),
            CommitOutcome::Stale
        );

        let after = store.load_engagement("p1", Some("u1")).await.unwrap().unwrap();
        assert_eq!(after.user_reaction, Some(ReactionType::Like));
        assert_eq!(after.counters.like_count, 1);
        assert_eq!(after.version, doc.version + 1);

        let item = store.get_item("p1").await.unwrap().unwrap();
        assert_eq!(item.counters.reaction(ReactionType::Like), 1);
    }

    #[tokio::test]
    async fn aggregates_create_then_update() {
        let (_dir, store) = open_temp();
        let key = AggregateKey::quiz("q1");
        let v0 = store.load_aggregate(&key).await.unwrap();
        assert_eq!(v0.version, 0);
        let mut doc = v0.value;
        doc.add_sample(8.0);
        assert_eq!(
            store.commit_aggregate(&key, 0, &doc).await.unwrap(),
            CommitOutcome::Committed
        );
        assert_eq!(
            store.commit_aggregate(&key, 0, &doc).await.unwrap(),
            CommitOutcome::Stale
        );
        let v1 = store.load_aggregate(&key).await.unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v1.value.count, 1);
    }

    #[tokio::test]
    async fn friends_are_linked_symmetrically() {
        let (_dir, store) = open_temp();
        store.upsert_profile(&UserProfile::new("a")).await.unwrap();
        store.upsert_profile(&UserProfile::new("b")).await.unwrap();
        store.link_friends("a", "b").await.unwrap();
        let profiles = store
            .get_profiles(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(profiles.len(), 2);
        for p in &profiles {
            assert_eq!(p.friends.len(), 1);
        }
        store.unlink_friends("b", "a").await.unwrap();
        let a = store.get_profile("a").await.unwrap().unwrap();
        assert!(a.friends.is_empty());
    }

    #[tokio::test]
    async fn feed_scores_come_back_best_first() {
        let (_dir, store) = open_temp();
        let recs: Vec<FeedScoreRecord> = [("i1", 0.2), ("i2", 0.9), ("i3", 0.5)]
            .iter()
            .map(|(id, s)| FeedScoreRecord {
                user_id: "v".to_string(),
                item_id: id.to_string(),
                community_id: Some("mit".to_string()),
                score: *s,
                kind: "post".to_string(),
            })
            .collect();
        store.upsert_feed_scores(&recs).await.unwrap();
        let top = store.top_feed_scores("v", Some("mit"), 2).await.unwrap();
        let ids: Vec<_> = top.iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(ids, vec!["i2", "i3"]);
        assert!(store
            .top_feed_scores("v", Some("other"), 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.top_feed_scores("v", None, 10).await.unwrap().len(), 3);
    }
}
