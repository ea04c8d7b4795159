//! Formatting helpers for display-ready values.

/// Format byte count as a human-readable binary size.
///
/// `"1.5 GiB"`, `"100.3 MiB"`, `"50.0 KiB"`, `"512 B"`
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;
    const TIB: u64 = GIB * 1024;

    let f = bytes as f64;
    if bytes >= TIB {
        format!("{:.1} TiB", f / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GiB", f / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", f / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", f / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(100 * 1024 * 1024 + 300 * 1024), "100.3 MiB");
        assert_eq!(format_bytes(16384000 * 1024), "15.6 GiB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024 * 1024), "2.0 TiB");
    }
}
