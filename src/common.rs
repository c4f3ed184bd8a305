// shared imports for the crate internals

pub(crate) use anyhow::{bail, ensure, Result};
pub(crate) use log::{debug, info, trace, warn};
