use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DirectoryConfig;
use crate::models::{is_valid_domain, normalize_domain, now_ms, TokenEntry};

const TOKEN_ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MAX_TOKEN_ATTEMPTS: u32 = 10;

const SAVE_DEBOUNCE: Duration = Duration::from_secs(2);
const SAVE_MIN_INTERVAL: Duration = Duration::from_secs(10);
const FLUSH_TICK: Duration = Duration::from_secs(30);
const SHARED_RELOAD_TICK: Duration = Duration::from_secs(120);
const DOMAIN_MISS_RELOAD_AFTER: Duration = Duration::from_secs(60);
const TOKEN_MISS_RELOAD_AFTER: Duration = Duration::from_secs(30);

const SOURCE_FILE: &str = "file";
const SOURCE_CREATED: &str = "created";

/// Last-resort copy of an entry, kept in-process so a corrupted DB file
/// never loses live tokens.
#[derive(Debug, Clone)]
struct BackupEntry {
    entry: TokenEntry,
    source: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub count: usize,
    pub sources: HashMap<String, usize>,
}

struct DirectoryState {
    by_token: HashMap<String, TokenEntry>,
    by_domain: HashMap<String, String>,
    backup: HashMap<String, BackupEntry>,
    dirty: bool,
    loading: bool,
    save_scheduled: bool,
    last_save: Instant,
    last_load: Instant,
}

impl DirectoryState {
    fn new() -> Self {
        Self {
            by_token: HashMap::new(),
            by_domain: HashMap::new(),
            backup: HashMap::new(),
            dirty: false,
            loading: false,
            save_scheduled: false,
            last_save: Instant::now(),
            last_load: Instant::now(),
        }
    }
}

/// Persistent bidirectional mapping between short tokens and upstream
/// origins, with lazy allocation, debounced atomic persistence, and an
/// in-process backup used when the DB file becomes unparseable.
///
/// Several processes may share one DB file; the periodic reload makes
/// that best-effort only. Conflicting writers resolve last-writer-wins
/// on the whole file and can lose each other's freshly allocated tokens
/// between reload ticks.
///
/// Cloning is cheap and clones share the same state.
#[derive(Clone)]
pub struct TokenDirectory {
    cfg: DirectoryConfig,
    state: Arc<Mutex<DirectoryState>>,
}

impl TokenDirectory {
    /// Open the directory and load the DB file. Never fails: a missing
    /// file is created, a broken one goes through backup recovery.
    pub fn open(cfg: DirectoryConfig) -> Self {
        let dir = Self {
            cfg,
            state: Arc::new(Mutex::new(DirectoryState::new())),
        };
        {
            let mut st = dir.lock();
            Self::load_into(&dir.cfg, &mut st);
        }
        dir
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.cfg
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolve `domain` to its token, allocating one on first sight.
    /// Freshly allocated tokens are persisted immediately.
    pub fn token_for_domain(&self, domain: &str) -> String {
        let domain = normalize_domain(domain);
        let mut st = self.lock();

        if let Some(token) = st.by_domain.get(&domain).cloned() {
            Self::touch(&mut st, &token);
            self.schedule_save(&mut st);
            return token;
        }

        // Another process may have allocated it since our last load.
        if st.last_load.elapsed() > DOMAIN_MISS_RELOAD_AFTER {
            Self::load_into(&self.cfg, &mut st);
            if let Some(token) = st.by_domain.get(&domain).cloned() {
                Self::touch(&mut st, &token);
                self.schedule_save(&mut st);
                return token;
            }
        }

        let token = Self::generate_token(&st, self.cfg.token_length);
        let entry = TokenEntry::new(domain.clone(), self.cfg.default_protocol);
        debug!(%token, %domain, "allocated token");
        st.by_token.insert(token.clone(), entry.clone());
        st.by_domain.insert(domain, token.clone());
        st.backup.insert(
            token.clone(),
            BackupEntry {
                entry,
                source: SOURCE_CREATED,
            },
        );
        st.dirty = true;
        Self::persist(&self.cfg, &mut st);
        token
    }

    /// Look up the upstream origin for `token`, refreshing its
    /// last-access timestamp. Falls back to the in-process backup and
    /// to a throttled disk reload before giving up.
    pub fn domain_info_from_token(&self, token: &str) -> Option<TokenEntry> {
        if !is_plausible_token(token) {
            return None;
        }
        let mut st = self.lock();

        if let Some(entry) = st.by_token.get_mut(token) {
            entry.touch();
            let out = entry.clone();
            st.dirty = true;
            self.schedule_save(&mut st);
            return Some(out);
        }

        if let Some(b) = st.backup.get(token).cloned() {
            let mut entry = b.entry;
            entry.touch();
            // re-materialise unless it would break the domain -> token bijection
            let conflict = st
                .by_domain
                .get(&entry.domain)
                .is_some_and(|existing| existing != token);
            if conflict {
                warn!(
                    %token,
                    domain = %entry.domain,
                    "backup entry conflicts with a live mapping; serving without re-materialising"
                );
            } else {
                st.by_token.insert(token.to_string(), entry.clone());
                st.by_domain.insert(entry.domain.clone(), token.to_string());
                st.dirty = true;
                self.schedule_save(&mut st);
            }
            return Some(entry);
        }

        if st.last_load.elapsed() > TOKEN_MISS_RELOAD_AFTER {
            Self::load_into(&self.cfg, &mut st);
            if let Some(entry) = st.by_token.get_mut(token) {
                entry.touch();
                let out = entry.clone();
                st.dirty = true;
                self.schedule_save(&mut st);
                return Some(out);
            }
        }

        None
    }

    /// Load the DB file synchronously and return the entry count.
    pub fn force_reload(&self) -> usize {
        let mut st = self.lock();
        Self::load_into(&self.cfg, &mut st);
        st.by_token.len()
    }

    pub fn len(&self) -> usize {
        self.lock().by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all_entries(&self) -> HashMap<String, TokenEntry> {
        self.lock().by_token.clone()
    }

    pub fn backup_info(&self) -> BackupInfo {
        let st = self.lock();
        let mut sources: HashMap<String, usize> = HashMap::new();
        for b in st.backup.values() {
            *sources.entry(b.source.to_string()).or_default() += 1;
        }
        BackupInfo {
            count: st.backup.len(),
            sources,
        }
    }

    /// Mark the state dirty and persist: immediately when forced or the
    /// last save is older than 10 s, otherwise debounced 2 s out.
    pub fn save(&self, force: bool) {
        let mut st = self.lock();
        st.dirty = true;
        if force {
            Self::persist(&self.cfg, &mut st);
        } else {
            self.schedule_save(&mut st);
        }
    }

    /// Persist now iff there are unsaved changes.
    pub fn flush(&self) {
        let mut st = self.lock();
        if st.dirty {
            Self::persist(&self.cfg, &mut st);
        }
    }

    /// Remove entries whose last access is older than the configured
    /// expiration, from the live maps and the backup alike.
    pub fn cleanup_expired(&self) -> usize {
        let expiration_ms = self.cfg.token_expiration_ms;
        let now = now_ms();
        let mut st = self.lock();

        let expired: Vec<String> = st
            .by_token
            .iter()
            .filter(|(_, e)| now.saturating_sub(e.timestamp) > expiration_ms)
            .map(|(t, _)| t.clone())
            .collect();
        for token in &expired {
            if let Some(entry) = st.by_token.remove(token) {
                st.by_domain.remove(&entry.domain);
            }
        }
        st.backup
            .retain(|_, b| now.saturating_sub(b.entry.timestamp) <= expiration_ms);

        if !expired.is_empty() {
            info!(removed = expired.len(), "expired tokens removed");
            st.dirty = true;
            self.schedule_save(&mut st);
        }
        expired.len()
    }

    /// Background persistence and housekeeping: a 30 s flush-if-dirty
    /// tick, a 2 min shared-file reload tick, and the expiry sweep.
    pub fn spawn_maintenance(&self, shutdown: CancellationToken) {
        let dir = self.clone();
        tokio::spawn(async move {
            let mut flush = tokio::time::interval(FLUSH_TICK);
            let mut reload = tokio::time::interval(SHARED_RELOAD_TICK);
            let mut cleanup = tokio::time::interval(dir.cfg.cleanup_interval());
            // consume the immediate first tick of each interval
            flush.tick().await;
            reload.tick().await;
            cleanup.tick().await;
            loop {
                tokio::select! {
                    _ = flush.tick() => dir.flush(),
                    _ = reload.tick() => dir.reload_if_clean(),
                    _ = cleanup.tick() => {
                        dir.cleanup_expired();
                    }
                    _ = shutdown.cancelled() => {
                        dir.flush();
                        break;
                    }
                }
            }
        });
    }

    /// Pick up additions from other processes sharing the DB file, but
    /// only while nothing of ours is unsaved.
    fn reload_if_clean(&self) {
        let mut st = self.lock();
        if !st.loading && !st.dirty {
            Self::load_into(&self.cfg, &mut st);
        }
    }

    fn touch(st: &mut DirectoryState, token: &str) {
        if let Some(entry) = st.by_token.get_mut(token) {
            entry.touch();
        }
        st.dirty = true;
    }

    fn schedule_save(&self, st: &mut DirectoryState) {
        if st.last_save.elapsed() > SAVE_MIN_INTERVAL {
            Self::persist(&self.cfg, st);
            return;
        }
        if st.save_scheduled {
            return;
        }
        st.save_scheduled = true;
        let cfg = self.cfg.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::time::sleep(SAVE_DEBOUNCE).await;
            let mut st = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            st.save_scheduled = false;
            if st.dirty {
                Self::persist(&cfg, &mut st);
            }
        });
    }

    /// Atomic write: serialize, write `<db>.tmp`, rename over the DB
    /// file. Failures are logged and leave `dirty` set so the next
    /// tick retries.
    fn persist(cfg: &DirectoryConfig, st: &mut DirectoryState) {
        let path = &cfg.db_file;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("failed to create {}: {e}", parent.display());
                return;
            }
        }
        let ordered: BTreeMap<&String, &TokenEntry> = st.by_token.iter().collect();
        let json = match serde_json::to_vec_pretty(&ordered) {
            Ok(json) => json,
            Err(e) => {
                error!("failed to serialize directory: {e}");
                return;
            }
        };
        let tmp = tmp_path(path);
        if let Err(e) = fs::write(&tmp, &json) {
            error!("failed to write {}: {e}", tmp.display());
            return;
        }
        if let Err(e) = fs::rename(&tmp, path) {
            error!("failed to rename {} onto {}: {e}", tmp.display(), path.display());
            return;
        }
        st.dirty = false;
        st.last_save = Instant::now();
        debug!(entries = st.by_token.len(), "directory saved");
    }

    fn load_into(cfg: &DirectoryConfig, st: &mut DirectoryState) {
        if st.loading {
            return;
        }
        st.loading = true;

        let path = &cfg.db_file;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("failed to create {}: {e}", parent.display());
            }
        }

        if !path.exists() {
            Self::persist(cfg, st);
            st.last_load = Instant::now();
            st.loading = false;
            return;
        }

        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<HashMap<String, TokenEntry>>(&content) {
                Ok(parsed) => {
                    let mut by_token = HashMap::new();
                    let mut by_domain: HashMap<String, String> = HashMap::new();
                    for (token, entry) in parsed {
                        if !is_plausible_token(&token) || !is_valid_domain(&entry.domain) {
                            warn!(%token, "skipping malformed directory entry");
                            continue;
                        }
                        if by_domain.contains_key(&entry.domain) {
                            warn!(%token, domain = %entry.domain, "skipping duplicate domain entry");
                            continue;
                        }
                        by_domain.insert(entry.domain.clone(), token.clone());
                        by_token.insert(token, entry);
                    }
                    for (token, entry) in &by_token {
                        st.backup.insert(
                            token.clone(),
                            BackupEntry {
                                entry: entry.clone(),
                                source: SOURCE_FILE,
                            },
                        );
                    }
                    debug!(entries = by_token.len(), "directory loaded");
                    st.by_token = by_token;
                    st.by_domain = by_domain;
                    st.dirty = false;
                    st.last_load = Instant::now();
                }
                Err(e) => {
                    error!("failed to parse {}: {e}", path.display());
                    Self::rebuild_from_backup(cfg, st);
                }
            },
            Err(e) => {
                error!("failed to read {}: {e}", path.display());
                Self::rebuild_from_backup(cfg, st);
            }
        }

        st.loading = false;
    }

    /// Recovery path: the DB file is unreadable or unparseable. Rebuild
    /// the live maps from the in-process backup (empty backup means an
    /// empty directory) and force-save a consistent file.
    fn rebuild_from_backup(cfg: &DirectoryConfig, st: &mut DirectoryState) {
        info!(entries = st.backup.len(), "recovering directory from in-process backup");
        let mut by_token = HashMap::new();
        let mut by_domain: HashMap<String, String> = HashMap::new();
        for (token, b) in &st.backup {
            if by_domain.contains_key(&b.entry.domain) {
                continue;
            }
            by_domain.insert(b.entry.domain.clone(), token.clone());
            by_token.insert(token.clone(), b.entry.clone());
        }
        st.by_token = by_token;
        st.by_domain = by_domain;
        st.last_load = Instant::now();
        Self::persist(cfg, st);
    }

    /// Draw `token_length` random bytes, map through the base-36
    /// alphabet, retry on collision; the final attempt appends the last
    /// 4 base-36 digits of the wall clock to break ties.
    fn generate_token(st: &DirectoryState, token_length: usize) -> String {
        let mut rng = rand::rng();
        let mut candidate = String::new();
        for _ in 0..MAX_TOKEN_ATTEMPTS {
            candidate = random_token(&mut rng, token_length);
            if !st.by_token.contains_key(&candidate) {
                return candidate;
            }
        }
        let mut suffixed = candidate;
        suffixed.push_str(&base36_tail(now_ms(), 4));
        suffixed
    }

    #[cfg(test)]
    fn age_entry_for_test(&self, token: &str, age_ms: u64) {
        let mut st = self.lock();
        let aged = now_ms().saturating_sub(age_ms);
        if let Some(entry) = st.by_token.get_mut(token) {
            entry.timestamp = aged;
        }
        if let Some(b) = st.backup.get_mut(token) {
            b.entry.timestamp = aged;
        }
    }
}

fn random_token(rng: &mut impl Rng, len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes[..]);
    bytes
        .iter()
        .map(|b| TOKEN_ALPHABET[(b % 36) as usize] as char)
        .collect()
}

/// Last `digits` base-36 digits of `n`, zero-padded.
fn base36_tail(mut n: u64, digits: usize) -> String {
    let mut out = vec![b'0'; digits];
    for slot in out.iter_mut().rev() {
        *slot = BASE36_DIGITS[(n % 36) as usize];
        n /= 36;
    }
    String::from_utf8(out).unwrap_or_default()
}

fn is_plausible_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= 63
        && token
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
