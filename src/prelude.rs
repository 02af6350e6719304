pub use anyhow::{Context, Result, bail, ensure};
#[allow(unused_imports)]
pub use log::{debug, error, info, trace, warn};
