//! The event taxonomy: six typed message variants, the free-form generic
//! form, and the common metadata they carry.

mod alias;
mod context;
mod generic;
mod group;
mod identify;
mod page;
mod screen;
mod timestamp;
mod track;

pub use alias::Alias;
pub use context::{
    AppInfo, CampaignInfo, Context, DeviceInfo, LibraryInfo, LocationInfo, NetworkInfo, OsInfo,
    PageInfo, ReferrerInfo, ScreenInfo,
};
pub use generic::GenericEvent;
pub use group::Group;
pub use identify::Identify;
pub use page::Page;
pub use screen::Screen;
pub use timestamp::Timestamp;
pub use track::Track;

use crate::error::FieldError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form payload attached to track, page and screen messages.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Free-form attributes attached to identify and group messages.
pub type Traits = serde_json::Map<String, serde_json::Value>;

/// Per-destination enable/disable flags and settings.
pub type Integrations = serde_json::Map<String, serde_json::Value>;

/// An analytics message of one of the six supported kinds.
///
/// The `type` discriminator on the wire is the enum tag and cannot be set by
/// callers, so a batch can never contain another batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Identify(Identify),
    Track(Track),
    Page(Page),
    Screen(Screen),
    Group(Group),
    Alias(Alias),
}

impl Event {
    /// The canonical lower-case discriminator of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Identify(_) => "identify",
            Event::Track(_) => "track",
            Event::Page(_) => "page",
            Event::Screen(_) => "screen",
            Event::Group(_) => "group",
            Event::Alias(_) => "alias",
        }
    }

    /// Checks the required-field matrix of the variant.
    pub fn validate(&self) -> Result<(), FieldError> {
        match self {
            Event::Identify(m) => m.validate(),
            Event::Track(m) => m.validate(),
            Event::Page(m) => m.validate(),
            Event::Screen(m) => m.validate(),
            Event::Group(m) => m.validate(),
            Event::Alias(m) => m.validate(),
        }
    }

    /// The message id as currently set, possibly empty.
    pub fn message_id(&self) -> &str {
        self.common().0
    }

    /// The event timestamp as currently set.
    pub fn timestamp(&self) -> Timestamp {
        *self.common().1
    }

    /// Fills in the message id and timestamp defaults. Caller-supplied values
    /// are kept, which is what keeps them stable across upload retries.
    pub(crate) fn stamp(&mut self, message_id: &str, now: DateTime<Utc>) {
        let (id, ts) = self.common_mut();
        if id.is_empty() {
            *id = message_id.to_owned();
        }
        ts.or_default(now);
    }

    fn common(&self) -> (&String, &Timestamp) {
        match self {
            Event::Identify(m) => (&m.message_id, &m.timestamp),
            Event::Track(m) => (&m.message_id, &m.timestamp),
            Event::Page(m) => (&m.message_id, &m.timestamp),
            Event::Screen(m) => (&m.message_id, &m.timestamp),
            Event::Group(m) => (&m.message_id, &m.timestamp),
            Event::Alias(m) => (&m.message_id, &m.timestamp),
        }
    }

    fn common_mut(&mut self) -> (&mut String, &mut Timestamp) {
        match self {
            Event::Identify(m) => (&mut m.message_id, &mut m.timestamp),
            Event::Track(m) => (&mut m.message_id, &mut m.timestamp),
            Event::Page(m) => (&mut m.message_id, &mut m.timestamp),
            Event::Screen(m) => (&mut m.message_id, &mut m.timestamp),
            Event::Group(m) => (&mut m.message_id, &mut m.timestamp),
            Event::Alias(m) => (&mut m.message_id, &mut m.timestamp),
        }
    }
}

impl From<Identify> for Event {
    fn from(m: Identify) -> Self {
        Event::Identify(m)
    }
}

impl From<Track> for Event {
    fn from(m: Track) -> Self {
        Event::Track(m)
    }
}

impl From<Page> for Event {
    fn from(m: Page) -> Self {
        Event::Page(m)
    }
}

impl From<Screen> for Event {
    fn from(m: Screen) -> Self {
        Event::Screen(m)
    }
}

impl From<Group> for Event {
    fn from(m: Group) -> Self {
        Event::Group(m)
    }
}

impl From<Alias> for Event {
    fn from(m: Alias) -> Self {
        Event::Alias(m)
    }
}
