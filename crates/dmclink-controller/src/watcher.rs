//! Pattern subscriptions over the message channel.
//!
//! A watcher resolves at most once, with the first frame its pattern
//! matches. Watchers are independent: one frame may resolve several of
//! them. Cancellation is idempotent, and dropping a [`WatcherHandle`]
//! cancels it, so an abandoned wait never leaks a registration.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use dmclink_frame::Frame;
use regex::Regex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::Channel;
use crate::error::{ControllerError, Result};

/// Owner used by [`WatcherRegistry::watch`].
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// What a watcher looks for in a frame.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Substring match.
    Literal(String),
    Regex(Regex),
}

impl Pattern {
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into())
    }

    /// Compile a regular expression.
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|err| ControllerError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: err.to_string(),
            })
    }

    /// Parse the `/expr/` form as a regex and anything else as a literal.
    pub fn parse(text: &str) -> Result<Self> {
        match text
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            Some(expr) if !expr.is_empty() => Self::regex(expr),
            _ => Ok(Self::literal(text)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(text) => text,
            Self::Regex(re) => re.as_str(),
        }
    }

    /// Test `text`; a hit yields the capture groups (group 0 is the match).
    pub fn captures(&self, text: &str) -> Option<Captures> {
        match self {
            Self::Literal(needle) => text.contains(needle.as_str()).then(|| Captures {
                groups: vec![Some(needle.clone())],
                named: HashMap::new(),
            }),
            Self::Regex(re) => {
                let caps = re.captures(text)?;
                let groups = caps
                    .iter()
                    .map(|group| group.map(|m| m.as_str().to_string()))
                    .collect();
                let named = re
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        caps.name(name)
                            .map(|m| (name.to_string(), m.as_str().to_string()))
                    })
                    .collect();
                Some(Captures { groups, named })
            }
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Literal(needle) => text.contains(needle.as_str()),
            Self::Regex(re) => re.is_match(text),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(text) => write!(f, "{text:?}"),
            Self::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Self::literal(text)
    }
}

impl From<String> for Pattern {
    fn from(text: String) -> Self {
        Self::Literal(text)
    }
}

impl From<Regex> for Pattern {
    fn from(re: Regex) -> Self {
        Self::Regex(re)
    }
}

/// Capture groups of a regex match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    groups: Vec<Option<String>>,
    named: HashMap<String, String>,
}

impl Captures {
    /// Group by index; 0 is the whole match.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.groups.get(index)?.as_deref()
    }

    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// A resolved watcher: the frame and what the pattern captured.
#[derive(Debug, Clone)]
pub struct WatchMatch {
    pub frame: Frame,
    pub captures: Captures,
}

struct Slot {
    owner: String,
    pattern: Pattern,
    tx: oneshot::Sender<WatchMatch>,
}

#[derive(Default)]
struct Slots {
    next_id: u64,
    // Ordered by id so dispatch follows registration order.
    active: BTreeMap<u64, Slot>,
}

/// Registry of active watchers. Clones share the registry.
#[derive(Clone, Default)]
pub struct WatcherRegistry {
    slots: Arc<Mutex<Slots>>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an anonymous watcher.
    pub fn watch(&self, pattern: impl Into<Pattern>) -> WatcherHandle {
        self.watch_as(ANONYMOUS_OWNER, pattern)
    }

    /// Register a watcher on behalf of `owner`.
    pub fn watch_as(&self, owner: &str, pattern: impl Into<Pattern>) -> WatcherHandle {
        let pattern = pattern.into();
        let (tx, rx) = oneshot::channel();
        let description = pattern.to_string();
        let mut slots = lock(&self.slots);
        let id = slots.next_id;
        slots.next_id += 1;
        slots.active.insert(
            id,
            Slot {
                owner: owner.to_string(),
                pattern,
                tx,
            },
        );
        debug!(id, owner, pattern = %description, "watcher registered");
        WatcherHandle {
            id,
            description,
            slots: Arc::downgrade(&self.slots),
            rx: Some(rx),
        }
    }

    /// Test `frame` against every active watcher and resolve the ones that
    /// match. Returns how many resolved.
    pub fn dispatch(&self, frame: &Frame) -> usize {
        let mut slots = lock(&self.slots);
        let hits: Vec<(u64, Captures)> = slots
            .active
            .iter()
            .filter_map(|(id, slot)| slot.pattern.captures(&frame.text).map(|caps| (*id, caps)))
            .collect();

        for (id, captures) in &hits {
            if let Some(slot) = slots.active.remove(id) {
                debug!(id, owner = %slot.owner, text = %frame.text, "watcher resolved");
                let _ = slot.tx.send(WatchMatch {
                    frame: frame.clone(),
                    captures: captures.clone(),
                });
            }
        }
        hits.len()
    }

    /// Cancel every watcher registered by `owner`. Returns how many.
    pub fn cancel_owner(&self, owner: &str) -> usize {
        let mut slots = lock(&self.slots);
        let before = slots.active.len();
        slots.active.retain(|_, slot| slot.owner != owner);
        before - slots.active.len()
    }

    pub fn active_count(&self) -> usize {
        lock(&self.slots).active.len()
    }

    /// Feed `channel`'s frames into the registry until `shutdown` fires.
    pub fn attach(&self, channel: &Channel, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        let mut frames = channel.subscribe();
        let kind = channel.kind();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = frames.recv() => match received {
                        Ok(frame) => {
                            registry.dispatch(&frame);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(channel = %kind, skipped, "watcher dispatch fell behind");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!(channel = %kind, "watcher dispatch stopped");
        })
    }
}

impl fmt::Debug for WatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherRegistry")
            .field("active", &self.active_count())
            .finish()
    }
}

/// Handle to one registered watcher. Dropping it cancels the watcher.
pub struct WatcherHandle {
    id: u64,
    description: String,
    slots: Weak<Mutex<Slots>>,
    rx: Option<oneshot::Receiver<WatchMatch>>,
}

impl WatcherHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The pattern, as displayed in logs.
    pub fn pattern(&self) -> &str {
        &self.description
    }

    /// Wait for the match. `None` once the watcher was cancelled or its
    /// match already taken.
    ///
    /// Cancel safe: dropping the future keeps the watcher armed.
    pub async fn resolved(&mut self) -> Option<WatchMatch> {
        let rx = self.rx.as_mut()?;
        let result = rx.await.ok();
        self.rx = None;
        result
    }

    /// Take the match if it has already arrived.
    pub fn try_resolved(&mut self) -> Option<WatchMatch> {
        let matched = self.rx.as_mut()?.try_recv().ok()?;
        self.rx = None;
        Some(matched)
    }

    /// Still registered and waiting.
    pub fn is_active(&self) -> bool {
        match self.slots.upgrade() {
            Some(slots) => {
                let active = lock(&slots).active.contains_key(&self.id);
                active
            }
            None => false,
        }
    }

    /// Remove the watcher. Idempotent.
    pub fn cancel(&self) {
        if let Some(slots) = self.slots.upgrade() {
            if lock(&slots).active.remove(&self.id).is_some() {
                debug!(id = self.id, "watcher cancelled");
            }
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("id", &self.id)
            .field("pattern", &self.description)
            .finish()
    }
}

fn lock(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use dmclink_frame::ChannelKind;

    use super::*;

    fn frame(text: &str) -> Frame {
        Frame::new(ChannelKind::Messages, text)
    }

    #[test]
    fn literal_and_regex_patterns() {
        let literal = Pattern::from("Startup");
        assert!(literal.is_match("End:Startup"));
        assert!(!literal.is_match("End:Load"));

        let re = Pattern::regex(r"^End:(?P<label>\w+)$").unwrap();
        let caps = re.captures("End:Startup").unwrap();
        assert_eq!(caps.get(0), Some("End:Startup"));
        assert_eq!(caps.get(1), Some("Startup"));
        assert_eq!(caps.name("label"), Some("Startup"));
        assert!(re.captures("End:Startup!").is_none());
    }

    #[test]
    fn parse_slash_form() {
        assert!(matches!(Pattern::parse("/^Err/").unwrap(), Pattern::Regex(_)));
        assert!(matches!(Pattern::parse("Err").unwrap(), Pattern::Literal(_)));
        assert!(matches!(Pattern::parse("//").unwrap(), Pattern::Literal(_)));
        assert!(matches!(
            Pattern::parse("/(/"),
            Err(ControllerError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn one_frame_resolves_every_matching_watcher() {
        let registry = WatcherRegistry::new();
        let mut a = registry.watch("Startup");
        let mut b = registry.watch(Pattern::regex("^End:").unwrap());
        let mut c = registry.watch("Load");

        assert_eq!(registry.dispatch(&frame("End:Startup")), 2);
        assert_eq!(a.try_resolved().unwrap().frame.text, "End:Startup");
        assert!(b.try_resolved().is_some());
        assert!(c.try_resolved().is_none());
        assert_eq!(registry.active_count(), 1);

        // Resolved watchers do not fire twice.
        assert_eq!(registry.dispatch(&frame("End:Startup")), 0);
    }

    #[test]
    fn cancel_is_idempotent_and_drop_cancels() {
        let registry = WatcherRegistry::new();
        let handle = registry.watch("x");
        assert!(handle.is_active());
        handle.cancel();
        handle.cancel();
        assert!(!handle.is_active());
        assert_eq!(registry.active_count(), 0);

        {
            let _dropped = registry.watch("y");
            assert_eq!(registry.active_count(), 1);
        }
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.dispatch(&frame("x y")), 0);
    }

    #[test]
    fn cancel_owner_removes_only_that_owner() {
        let registry = WatcherRegistry::new();
        let _a = registry.watch_as("startup", "one");
        let _b = registry.watch_as("startup", "two");
        let c = registry.watch_as("load", "three");

        assert_eq!(registry.cancel_owner("startup"), 2);
        assert_eq!(registry.cancel_owner("startup"), 0);
        assert!(c.is_active());
    }

    #[tokio::test]
    async fn resolved_after_dispatch() {
        let registry = WatcherRegistry::new();
        let mut handle = registry.watch(Pattern::regex(r"^End:Startup$").unwrap());
        let feeder = registry.clone();
        tokio::spawn(async move {
            feeder.dispatch(&frame("noise"));
            feeder.dispatch(&frame("End:Startup"));
        });

        let matched = handle.resolved().await.unwrap();
        assert_eq!(matched.frame.text, "End:Startup");
        assert!(handle.resolved().await.is_none());
    }

    #[tokio::test]
    async fn handle_outliving_registry_resolves_none() {
        let registry = WatcherRegistry::new();
        let mut handle = registry.watch("x");
        drop(registry);
        assert!(handle.resolved().await.is_none());
        handle.cancel();
    }
}
