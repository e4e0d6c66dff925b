//! Typed identities and the token registry.
//!
//! Host handles (`NodeHandle`, `WindowHandle`, `WindowId`) are minted by the
//! host; tokens (`TimerToken`, `XhrToken`) are minted here and handed to the
//! host so it can name a parked callback when it re-enters. Each kind is its
//! own newtype, so a node handle can never be used to look up a window
//! listener or a timer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident($inner:ty), $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Wrap a raw value
            pub const fn new(raw: $inner) -> Self {
                Self(raw)
            }

            /// The raw value
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }

        impl From<$name> for crate::value::HostValue {
            fn from(id: $name) -> Self {
                crate::value::HostValue::Number(id.0 as f64)
            }
        }
    };
}

define_id!(
    /// Host-minted handle of a DOM node
    NodeHandle(u64),
    "node"
);
define_id!(
    /// Host-minted handle keying a window's listener registry
    WindowHandle(u64),
    "window-handle"
);
define_id!(
    /// Host-minted identity of a window / script environment
    WindowId(i64),
    "window"
);
define_id!(
    /// Script-minted token naming a parked timer callback
    TimerToken(u64),
    "timer"
);
define_id!(
    /// Script-minted token naming a registered XHR
    XhrToken(u64),
    "xhr"
);
define_id!(
    /// Identifies one listener registration
    ListenerId(u64),
    "listener"
);

impl WindowId {
    /// Sentinel identity of a window that is not addressable from here
    pub const CROSS_ORIGIN: WindowId = WindowId(-1);

    /// Whether this is the cross-origin sentinel
    pub fn is_cross_origin(self) -> bool {
        self == Self::CROSS_ORIGIN
    }
}

/// A token type a `TokenTable` can mint
pub trait Token: Copy + Eq + Hash + fmt::Display {
    /// Registry kind, used in errors and logs
    const KIND: &'static str;

    /// Build from the table's counter
    fn from_raw(raw: u64) -> Self;

    /// Raw counter value
    fn raw(self) -> u64;
}

impl Token for TimerToken {
    const KIND: &'static str = "timer";

    fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    fn raw(self) -> u64 {
        self.0
    }
}

impl Token for XhrToken {
    const KIND: &'static str = "xhr";

    fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    fn raw(self) -> u64 {
        self.0
    }
}

/// Slot state for one minted token
#[derive(Debug)]
enum Slot<V> {
    Parked(V),
    Spent,
}

/// Result of claiming a parked value
#[derive(Debug)]
pub enum Claim<V> {
    /// The parked value, now removed from its slot
    Ready(V),
    /// The token was minted here but its value was already claimed
    Spent,
    /// The token was minted before the table was last cleared; its value
    /// was dropped, possibly without ever being claimed
    Cleared,
    /// The token was never minted by this table
    Unknown,
}

/// Append-only registry mapping script-minted tokens to parked values.
///
/// Tokens come from a counter that only grows, so a token maps to exactly one
/// value for the table's whole lifetime. While nothing is evicted the counter
/// equals the number of entries, matching `Object.keys(registry).length`.
#[derive(Debug)]
pub struct TokenTable<K, V> {
    entries: HashMap<K, Slot<V>>,
    next: u64,
    cleared_below: u64,
}

impl<K: Token, V> Default for TokenTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Token, V> TokenTable<K, V> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next: 0,
            cleared_below: 0,
        }
    }

    /// Park a value under a fresh token
    pub fn mint(&mut self, value: V) -> K {
        let token = K::from_raw(self.next);
        self.next += 1;
        self.entries.insert(token, Slot::Parked(value));
        token
    }

    /// Whether this table ever minted `token`
    pub fn was_minted(&self, token: K) -> bool {
        token.raw() < self.next
    }

    /// Borrow a parked value
    pub fn get(&self, token: K) -> Option<&V> {
        match self.entries.get(&token) {
            Some(Slot::Parked(value)) => Some(value),
            _ => None,
        }
    }

    /// Take the parked value out.
    ///
    /// With `retain` the entry stays behind as a spent marker; without it the
    /// entry is evicted.
    pub fn claim(&mut self, token: K, retain: bool) -> Claim<V> {
        let slot = if retain {
            self.entries.get_mut(&token).map(|slot| std::mem::replace(slot, Slot::Spent))
        } else {
            self.entries.remove(&token)
        };

        match slot {
            Some(Slot::Parked(value)) => Claim::Ready(value),
            Some(Slot::Spent) => Claim::Spent,
            None if token.raw() < self.cleared_below => Claim::Cleared,
            None if self.was_minted(token) => Claim::Spent,
            None => Claim::Unknown,
        }
    }

    /// Evict an entry regardless of state
    pub fn remove(&mut self, token: K) -> Option<V> {
        match self.entries.remove(&token) {
            Some(Slot::Parked(value)) => Some(value),
            _ => None,
        }
    }

    /// Entries currently held (parked and spent)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries still waiting for the host
    pub fn parked(&self) -> usize {
        self.entries
            .values()
            .filter(|slot| matches!(slot, Slot::Parked(_)))
            .count()
    }

    /// Total tokens ever minted
    pub fn minted(&self) -> u64 {
        self.next
    }

    /// Drop every entry. The counter keeps running so tokens are not reused.
    pub fn clear(&mut self) {
        self.drain();
    }

    /// Remove every entry and hand back the values still parked, so the
    /// caller can drop them outside its lock
    pub fn drain(&mut self) -> Vec<V> {
        self.cleared_below = self.next;
        self.entries
            .drain()
            .filter_map(|(_, slot)| match slot {
                Slot::Parked(value) => Some(value),
                Slot::Spent => None,
            })
            .collect()
    }
}
