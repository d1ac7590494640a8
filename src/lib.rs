mod channels;
mod client;
mod diff;
mod epg;
mod error;
mod logger;
mod protocol;
mod types;

pub use channels::{ChannelDirectory, ChannelRecord};
pub use client::{Command, CommandStatus, LiveboxClient, LiveboxClientBuilder};
pub use diff::SnapshotDelta;
pub use epg::{FranceGuide, GuideEntry, GuideSource, PolandGuide, ProgramKind};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use protocol::{Key, KeyPressMode, StatusPayload};
pub use types::*;
