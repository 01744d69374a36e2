#![cfg(feature = "web")]
//! Per-browser session storage.
//!
//! Each browser gets a random session id in a cookie. The id keys a
//! [`Session`] holding that browser's uploads and its latest results, so two
//! users never see each other's files. Sessions idle longer than the
//! configured lifetime are dropped along with their data.
//!
//! Tables are shared through [`Arc`] so handlers can copy them out under a
//! short lock, work on them with the lock released, and write the output
//! back afterwards. A session revision that changes on every upload and
//! clear tells them whether that write-back is still valid.

use crate::error::{Result, SheetError};
use crate::table::Table;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session";

/// Slot name that refers to the latest result rather than an upload
pub const RESULT_SLOT: &str = "result";

/// A parsed upload
#[derive(Clone, Debug)]
pub struct Upload {
    pub filename: String,
    pub sheets: Vec<String>,
    pub table: Arc<Table>,
}

/// Output of the last process, compare, merge or workflow call
#[derive(Clone, Debug)]
pub struct StoredResult {
    /// Download name without extension
    pub name: String,
    pub table: Arc<Table>,
}

impl StoredResult {
    pub fn new(name: impl Into<String>, table: Table) -> Self {
        StoredResult {
            name: name.into(),
            table: Arc::new(table),
        }
    }
}

#[derive(Debug)]
pub struct Session {
    /// Uploads in the order they arrived
    uploads: Vec<(String, Upload)>,
    /// Results by key; the first is the one `result` names
    results: Vec<(String, StoredResult)>,
    revision: u64,
    pub authenticated: bool,
    expires_at: SystemTime,
}

impl Session {
    fn new(expires_at: SystemTime) -> Self {
        Session {
            uploads: Vec::new(),
            results: Vec::new(),
            revision: 0,
            authenticated: false,
            expires_at,
        }
    }

    /// Store an upload, replacing whatever the slot held.
    ///
    /// The previous results are dropped since they may have been built from
    /// the replaced file.
    ///
    /// # Arguments
    /// * `slot` - Slot name, taken from the multipart field name
    /// * `upload` - The parsed file
    pub fn put_upload(&mut self, slot: &str, upload: Upload) {
        self.results.clear();
        self.revision += 1;
        match self.uploads.iter_mut().find(|(name, _)| name == slot) {
            Some((_, existing)) => *existing = upload,
            None => self.uploads.push((slot.to_string(), upload)),
        }
    }

    pub fn upload(&self, slot: &str) -> Result<&Upload> {
        self.uploads
            .iter()
            .find(|(name, _)| name == slot)
            .map(|(_, upload)| upload)
            .ok_or_else(|| SheetError::NoUpload(slot.to_string()))
    }

    pub fn slots(&self) -> Vec<String> {
        self.uploads.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Changes whenever uploads are replaced or cleared
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn set_result(&mut self, name: String, table: Table) {
        self.set_results(vec![(RESULT_SLOT.to_string(), StoredResult::new(name, table))]);
    }

    /// Replace all results; each stays reachable as `result:<key>`
    pub fn set_results(&mut self, results: Vec<(String, StoredResult)>) {
        self.results = results;
    }

    pub fn result(&self) -> Result<&StoredResult> {
        self.results
            .first()
            .map(|(_, result)| result)
            .ok_or_else(|| SheetError::NoUpload(RESULT_SLOT.to_string()))
    }

    /// Look up `result` or `result:<key>`; `None` for upload slot names
    pub fn stored(&self, source: &str) -> Option<Result<&StoredResult>> {
        if source == RESULT_SLOT {
            return Some(self.result());
        }
        let key = source.strip_prefix("result:")?;
        Some(
            self.results
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, result)| result)
                .ok_or_else(|| SheetError::NoUpload(source.to_string())),
        )
    }

    /// Display name and table behind a slot name or result reference
    pub fn named_table(&self, source: &str) -> Result<(String, Arc<Table>)> {
        match self.stored(source) {
            Some(result) => {
                let result = result?;
                Ok((result.name.clone(), result.table.clone()))
            }
            None => {
                let upload = self.upload(source)?;
                Ok((upload.filename.clone(), upload.table.clone()))
            }
        }
    }

    /// The table behind a slot name; `result` names the latest result
    pub fn table(&self, source: &str) -> Result<Arc<Table>> {
        Ok(self.named_table(source)?.1)
    }

    /// Drop uploads and results; the login state is kept
    pub fn clear(&mut self) {
        self.uploads.clear();
        self.results.clear();
        self.revision += 1;
    }
}

/// True for names that refer to results and so cannot hold uploads
pub fn is_result_slot(slot: &str) -> bool {
    slot == RESULT_SLOT || slot.starts_with("result:")
}

/// All live sessions
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        SessionStore {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Continue the session `id`, or start a new one if it is unknown or expired.
    ///
    /// Returns the live id and whether it was just created.
    pub fn resume(&self, id: Option<&str>) -> (String, bool) {
        let now = SystemTime::now();
        let mut sessions = self.write();

        if let Some(id) = id {
            if let Some(session) = sessions.get_mut(id) {
                if session.expires_at > now {
                    session.expires_at = now + self.ttl;
                    return (id.to_string(), false);
                }
                sessions.remove(id);
                debug!("Session {} expired", id);
            }
        }

        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at > now);
        let purged = before - sessions.len();
        if purged > 0 {
            info!("Dropped {} expired sessions", purged);
        }

        let id = Uuid::new_v4().to_string();
        sessions.insert(id.clone(), Session::new(now + self.ttl));
        (id, true)
    }

    /// Run `f` against the session, creating it if it vanished
    ///
    /// The whole store is locked while `f` runs, so `f` should only copy
    /// data in or out.
    pub fn with_session<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> R {
        let expires_at = SystemTime::now() + self.ttl;
        let mut sessions = self.write();
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(expires_at));
        f(session)
    }

    /// Move the session's data under a fresh id and forget the old one
    pub fn rotate(&self, id: &str) -> String {
        let expires_at = SystemTime::now() + self.ttl;
        let mut sessions = self.write();
        let mut session = sessions
            .remove(id)
            .unwrap_or_else(|| Session::new(expires_at));
        session.expires_at = expires_at;

        let fresh = Uuid::new_v4().to_string();
        sessions.insert(fresh.clone(), session);
        fresh
    }

    pub fn is_authenticated(&self, id: &str) -> bool {
        self.read()
            .get(id)
            .map(|s| s.authenticated && s.expires_at > SystemTime::now())
            .unwrap_or(false)
    }

    pub fn remove(&self, id: &str) {
        self.write().remove(id);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }
}

/// The caller's session id, placed in request extensions by [`session_layer`].
///
/// A handler that rotates the session puts the new id in its response
/// extensions, and the layer then sends that id as the cookie.
#[derive(Clone, Debug)]
pub struct SessionId(pub String);

fn session_cookie(id: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Middleware giving every request a session, setting the cookie for new ones
pub async fn session_layer(
    State(store): State<Arc<SessionStore>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let existing = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    let (id, created) = store.resume(existing.as_deref());
    if created {
        debug!("Started session ({} live)", store.len());
    }
    request.extensions_mut().insert(SessionId(id.clone()));

    let response = next.run(request).await;
    let rotated = response
        .extensions()
        .get::<SessionId>()
        .map(|SessionId(fresh)| fresh.clone());
    match rotated {
        Some(fresh) => (jar.add(session_cookie(fresh)), response).into_response(),
        None if created => (jar.add(session_cookie(id)), response).into_response(),
        None => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellValue;

    fn upload(name: &str) -> Upload {
        Upload {
            filename: name.to_string(),
            sheets: vec!["Sheet1".into()],
            table: Arc::new(Table::from_rows(["id"], vec![vec![CellValue::Int(1)]])),
        }
    }

    #[test]
    fn resume_keeps_live_sessions() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (id, created) = store.resume(None);
        assert!(created);
        assert_eq!(store.resume(Some(&id)), (id.clone(), false));
        let (other, created) = store.resume(Some("forged"));
        assert!(created);
        assert_ne!(other, id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn expired_sessions_are_replaced() {
        let store = SessionStore::new(Duration::ZERO);
        let (id, _) = store.resume(None);
        let (next, created) = store.resume(Some(&id));
        assert!(created);
        assert_ne!(next, id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn uploads_replace_by_slot() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (id, _) = store.resume(None);
        store.with_session(&id, |s| {
            s.put_upload("left", upload("a.xlsx"));
            s.put_upload("right", upload("b.xlsx"));
            s.put_upload("left", upload("c.xlsx"));
        });

        store.with_session(&id, |s| {
            assert_eq!(s.slots(), vec!["left", "right"]);
            assert_eq!(s.upload("left").unwrap().filename, "c.xlsx");
            assert!(matches!(s.upload("third"), Err(SheetError::NoUpload(_))));
            assert!(s.table(RESULT_SLOT).is_err());

            s.set_result("out".into(), Table::new(vec!["x".into()]));
            assert_eq!(s.table(RESULT_SLOT).unwrap().columns, vec!["x"]);
            s.put_upload("right", upload("d.xlsx"));
            assert!(s.result().is_err());

            s.clear();
            assert!(s.slots().is_empty());
        });
    }

    #[test]
    fn keyed_results_are_addressable() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (id, _) = store.resume(None);
        store.with_session(&id, |s| {
            s.set_results(vec![
                ("active".into(), StoredResult::new("Active_File", Table::new(vec!["LAN".into()]))),
                ("reendo".into(), StoredResult::new("REENDO_Accounts", Table::new(vec!["x".into()]))),
            ]);
            assert_eq!(s.result().unwrap().name, "Active_File");
            let (name, table) = s.named_table("result:reendo").unwrap();
            assert_eq!(name, "REENDO_Accounts");
            assert_eq!(table.columns, vec!["x"]);
            assert!(matches!(s.named_table("result:missing"), Err(SheetError::NoUpload(_))));
            assert!(s.stored("left").is_none());
        });
        assert!(is_result_slot("result:active"));
        assert!(!is_result_slot("results"));
    }

    #[test]
    fn revision_moves_on_upload_and_clear() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (id, _) = store.resume(None);
        let start = store.with_session(&id, |s| s.revision());
        store.with_session(&id, |s| s.set_result("out".into(), Table::new(vec![])));
        assert_eq!(store.with_session(&id, |s| s.revision()), start);
        store.with_session(&id, |s| s.put_upload("file", upload("a.xlsx")));
        let uploaded = store.with_session(&id, |s| s.revision());
        assert!(uploaded > start);
        store.with_session(&id, |s| s.clear());
        assert!(store.with_session(&id, |s| s.revision()) > uploaded);
    }

    #[test]
    fn sessions_do_not_share_uploads() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (a, _) = store.resume(None);
        let (b, _) = store.resume(None);
        store.with_session(&a, |s| s.put_upload("file", upload("a.xlsx")));
        assert!(store.with_session(&b, |s| s.upload("file").is_err()));
    }

    #[test]
    fn login_flag_is_per_session() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (id, _) = store.resume(None);
        assert!(!store.is_authenticated(&id));
        store.with_session(&id, |s| s.authenticated = true);
        assert!(store.is_authenticated(&id));
        store.remove(&id);
        assert!(!store.is_authenticated(&id));
    }

    #[test]
    fn rotate_moves_data_to_a_fresh_id() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (old, _) = store.resume(None);
        store.with_session(&old, |s| s.put_upload("file", upload("a.xlsx")));

        let fresh = store.rotate(&old);
        assert_ne!(fresh, old);
        assert_eq!(store.len(), 1);
        assert!(store.with_session(&fresh, |s| s.upload("file").is_ok()));
        let (resumed, created) = store.resume(Some(&old));
        assert!(created);
        assert_ne!(resumed, old);
    }
}
