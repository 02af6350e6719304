const BASE: u64 = 1024;
const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

/// Render a byte count with binary units, e.g. `1.00MiB`.
///
/// Counts below 1 KiB are printed as-is, `512B`.
pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < BASE {
        return format!("{bytes}B");
    }

    let mut divisor = BASE;
    let mut unit_index = 0;
    let mut remaining = bytes / BASE;
    while remaining >= BASE && unit_index < UNITS.len() - 1 {
        divisor *= BASE;
        unit_index += 1;
        remaining /= BASE;
    }

    format!("{:.2}{}", bytes as f64 / divisor as f64, UNITS[unit_index])
}
