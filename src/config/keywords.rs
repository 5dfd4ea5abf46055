//! Kernel provider keyword names.
//!
//! Names follow the kernel trace parser's keyword flags so existing collector
//! definitions keep working. A keyword expression is either a numeric mask
//! (`0x...` or decimal) or one or more names joined by `,` or `|`.

/// `(name, mask)` pairs, matched case-insensitively.
pub const KERNEL_KEYWORDS: &[(&str, u64)] = &[
    ("None", 0),
    ("Process", 0x0000_0001),
    ("Thread", 0x0000_0002),
    ("ImageLoad", 0x0000_0004),
    ("ProcessCounters", 0x0000_0008),
    ("ContextSwitch", 0x0000_0010),
    ("DeferedProcedureCalls", 0x0000_0020),
    ("Interrupt", 0x0000_0040),
    ("SystemCall", 0x0000_0080),
    ("DiskIO", 0x0000_0100),
    ("DiskFileIO", 0x0000_0200),
    ("DiskIOInit", 0x0000_0400),
    ("Dispatcher", 0x0000_0800),
    ("Memory", 0x0000_1000),
    ("MemoryHardFaults", 0x0000_2000),
    ("VirtualAlloc", 0x0000_4000),
    ("VAMap", 0x0000_8000),
    ("NetworkTCPIP", 0x0001_0000),
    ("Registry", 0x0002_0000),
    ("AdvancedLocalProcedureCalls", 0x0010_0000),
    ("SplitIO", 0x0020_0000),
    ("Handle", 0x0040_0000),
    ("Driver", 0x0080_0000),
    ("OS", 0x00B0_0060),
    ("Profile", 0x0100_0000),
    ("Default", 0x0101_270F),
    ("ThreadTime", 0x0101_2F1F),
    ("FileIO", 0x0200_0000),
    ("FileIOInit", 0x0400_0000),
    ("Verbose", 0x0703_FF1F),
    ("All", 0x07B3_FFFF),
    ("IOQueue", 0x1000_0000),
    ("ThreadPriority", 0x2000_0000),
    ("ReferenceSet", 0x4000_0000),
    ("PMCProfile", 0x8000_0000),
    ("NonContainer", 0xFEFF_FFE0),
];

/// Parses a `0x` hex or decimal u64.
pub fn parse_mask(value: &str) -> Option<u64> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Resolves a keyword expression into its mask. Unknown names yield `None`.
pub fn parse_kernel_keywords(expr: &str) -> Option<u64> {
    if let Some(mask) = parse_mask(expr) {
        return Some(mask);
    }
    let mut mask = 0;
    for name in expr.split([',', '|']).map(str::trim) {
        let (_, bits) = KERNEL_KEYWORDS
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name))?;
        mask |= bits;
    }
    Some(mask)
}

/// Name of a mask that is exactly one known keyword, else the hex mask.
pub fn describe_kernel_keywords(mask: u64) -> String {
    KERNEL_KEYWORDS
        .iter()
        .find(|(_, bits)| *bits == mask)
        .map(|(name, _)| (*name).to_owned())
        .unwrap_or_else(|| format!("0x{mask:X}"))
}
