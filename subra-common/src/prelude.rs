#[rustfmt::skip]
pub use crate::exception::{ErrorCode, SubResult};
pub use crate::{fmt_err, str_err};

#[rustfmt::skip]
// std
pub use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
pub use std::sync::Arc;
pub use std::time::{Duration, Instant};

#[rustfmt::skip]
pub type InlineStr = smartstring::SmartString<smartstring::Compact>;
pub use once_cell::sync::Lazy;
pub use parking_lot::{Condvar, Mutex, RwLock};

#[rustfmt::skip]
pub use log::Level::{
    Debug as LogLevelDebug, Info as LogLevelInfo, Trace as LogLevelTrace, Warn as LogLevelWarn,
};
pub use log::{debug, error, info, log_enabled, trace, warn, LevelFilter};
