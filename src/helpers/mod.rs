mod format_size;

pub(crate) use format_size::format_size;
