use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter};
use uuid::Uuid;

use vibing_shared::{Message, MessageId, NewMessage, UserId};

use crate::database::{decode_ts, encode_ts, Database};
use crate::error::{Result, StoreError};

const MESSAGE_COLUMNS: &str =
    "id, sender_id, receiver_id, content, created_at, is_read, hidden_by_sender, hidden_by_receiver";

impl Database {
    pub fn insert_message(&self, message: &NewMessage, created_at: DateTime<Utc>) -> Result<Message> {
        self.conn().execute(
            "INSERT INTO messages (sender_id, receiver_id, content, created_at, is_read)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.sender_id.to_string(),
                message.receiver_id.to_string(),
                message.content,
                encode_ts(&created_at),
                message.is_read,
            ],
        )?;
        let id = MessageId(self.conn().last_insert_rowid());
        self.get_message(id)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.0],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Every message `me` can see, newest first.  A NULL hidden flag counts
    /// as not hidden.
    pub fn visible_messages(&self, me: UserId) -> Result<Vec<Message>> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE (sender_id = ?1 AND hidden_by_sender IS NOT 1)
                    OR (receiver_id = ?1 AND hidden_by_receiver IS NOT 1)
                 ORDER BY created_at DESC, id DESC"
            ),
            vec![me.to_string()],
        )
    }

    /// History between `me` and `other` that `me` has not hidden, oldest first.
    pub fn thread(&self, me: UserId, other: UserId) -> Result<Vec<Message>> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2 AND hidden_by_sender IS NOT 1)
                    OR (sender_id = ?2 AND receiver_id = ?1 AND hidden_by_receiver IS NOT 1)
                 ORDER BY created_at ASC, id ASC"
            ),
            vec![me.to_string(), other.to_string()],
        )
    }

    /// Messages to `me` created strictly after `since`, oldest first.
    pub fn received_since(&self, me: UserId, since: DateTime<Utc>) -> Result<Vec<Message>> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE receiver_id = ?1 AND created_at > ?2
                 ORDER BY created_at ASC, id ASC"
            ),
            vec![me.to_string(), encode_ts(&since)],
        )
    }

    /// Returns the number of rows updated.
    pub fn mark_read(&self, ids: &[MessageId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let affected = self.conn().execute(
            &format!("UPDATE messages SET is_read = 1 WHERE id IN ({placeholders})"),
            params_from_iter(ids.iter().map(|id| id.0)),
        )?;
        Ok(affected)
    }

    /// Unread rows addressed to `me`, not counting conversations `me` hid.
    pub fn unread_count(&self, me: UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE receiver_id = ?1 AND is_read = 0 AND hidden_by_receiver IS NOT 1",
            params![me.to_string()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Flag the conversation hidden on `me`'s side only.  Returns the number
    /// of rows touched.
    pub fn hide_conversation(&self, me: UserId, other: UserId) -> Result<usize> {
        let sent = self.conn().execute(
            "UPDATE messages SET hidden_by_sender = 1 WHERE sender_id = ?1 AND receiver_id = ?2",
            params![me.to_string(), other.to_string()],
        )?;
        let received = self.conn().execute(
            "UPDATE messages SET hidden_by_receiver = 1 WHERE receiver_id = ?1 AND sender_id = ?2",
            params![me.to_string(), other.to_string()],
        )?;
        Ok(sent + received)
    }

    fn query_messages(&self, sql: &str, args: Vec<String>) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

pub(crate) fn parse_user(idx: usize, s: &str) -> rusqlite::Result<UserId> {
    Uuid::parse_str(s).map(UserId).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let ts_str: String = row.get(4)?;
    let hidden_by_sender: Option<bool> = row.get(6)?;
    let hidden_by_receiver: Option<bool> = row.get(7)?;

    Ok(Message {
        id: MessageId(row.get(0)?),
        sender_id: parse_user(1, &sender_str)?,
        receiver_id: parse_user(2, &receiver_str)?,
        content: row.get(3)?,
        created_at: decode_ts(4, &ts_str)?,
        is_read: row.get(5)?,
        hidden_by_sender: hidden_by_sender.unwrap_or(false),
        hidden_by_receiver: hidden_by_receiver.unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn send(db: &Database, from: UserId, to: UserId, text: &str, at: DateTime<Utc>) -> Message {
        db.insert_message(&NewMessage::new(from, to, text), at).unwrap()
    }

    #[test]
    fn visibility_and_ordering() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let t0 = Utc::now();

        let m1 = send(&db, a, b, "one", t0);
        let m2 = send(&db, b, a, "two", t0 + Duration::seconds(1));
        let m3 = send(&db, c, a, "three", t0 + Duration::seconds(2));

        let visible: Vec<_> = db.visible_messages(a).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(visible, vec![m3.id, m2.id, m1.id]);

        let thread: Vec<_> = db.thread(a, b).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(thread, vec![m1.id, m2.id]);

        assert!(db.visible_messages(b).unwrap().iter().all(|m| m.id != m3.id));
    }

    #[test]
    fn hiding_is_one_sided() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let t0 = Utc::now();
        send(&db, a, b, "hello", t0);
        send(&db, b, a, "hey", t0 + Duration::seconds(1));

        assert_eq!(db.hide_conversation(a, b).unwrap(), 2);

        assert!(db.visible_messages(a).unwrap().is_empty());
        assert!(db.thread(a, b).unwrap().is_empty());
        assert_eq!(db.visible_messages(b).unwrap().len(), 2);
        assert_eq!(db.thread(b, a).unwrap().len(), 2);
    }

    #[test]
    fn received_since_is_strict_and_ascending() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let t0 = Utc::now();
        let first = send(&db, b, a, "1", t0);
        let second = send(&db, b, a, "2", t0 + Duration::milliseconds(10));
        send(&db, a, b, "mine", t0 + Duration::milliseconds(20));

        let after_first = db.received_since(a, first.created_at).unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].id, second.id);

        let all = db.received_since(a, t0 - Duration::seconds(1)).unwrap();
        assert_eq!(all.iter().map(|m| m.id).collect::<Vec<_>>(), vec![first.id, second.id]);
    }

    #[test]
    fn unread_counting_and_mark_read() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let t0 = Utc::now();
        let m1 = send(&db, b, a, "1", t0);
        let m2 = send(&db, b, a, "2", t0);
        assert_eq!(db.unread_count(a).unwrap(), 2);
        assert_eq!(db.unread_count(b).unwrap(), 0);

        assert_eq!(db.mark_read(&[]).unwrap(), 0);
        assert_eq!(db.mark_read(&[m1.id, m2.id]).unwrap(), 2);
        assert_eq!(db.unread_count(a).unwrap(), 0);
        assert!(db.get_message(m1.id).unwrap().is_read);
    }

    #[test]
    fn hidden_rows_leave_the_unread_count() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let t0 = Utc::now();
        send(&db, b, a, "from b", t0);
        send(&db, c, a, "from c", t0);
        assert_eq!(db.unread_count(a).unwrap(), 2);

        db.hide_conversation(a, b).unwrap();
        assert_eq!(db.unread_count(a).unwrap(), 1);

        // A later message from b counts again.
        send(&db, b, a, "again", t0 + Duration::seconds(1));
        assert_eq!(db.unread_count(a).unwrap(), 2);

        // Hiding on b's side never changes a's count.
        db.hide_conversation(c, a).unwrap();
        assert_eq!(db.unread_count(a).unwrap(), 2);
    }

    #[test]
    fn missing_message_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_message(MessageId(99)), Err(StoreError::NotFound)));
    }
}
