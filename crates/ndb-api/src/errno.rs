// ── Origin error codes ──
//
// Linux errno values the sources use to reject requests. Callers compare
// against these, so they match the kernel numbering exactly.

pub const ENOENT: i32 = 2;
pub const ESRCH: i32 = 3;
pub const EBUSY: i32 = 16;
pub const EEXIST: i32 = 17;
pub const ENODEV: i32 = 19;
pub const EINVAL: i32 = 22;
pub const EOPNOTSUPP: i32 = 95;
pub const EADDRNOTAVAIL: i32 = 99;
pub const ENETUNREACH: i32 = 101;

/// Human-readable text for an errno, as `strerror(3)` would print it.
pub fn describe(code: i32) -> &'static str {
    match code {
        ENOENT => "No such file or directory",
        ESRCH => "No such process",
        EBUSY => "Device or resource busy",
        EEXIST => "File exists",
        ENODEV => "No such device",
        EINVAL => "Invalid argument",
        EOPNOTSUPP => "Operation not supported",
        EADDRNOTAVAIL => "Cannot assign requested address",
        ENETUNREACH => "Network is unreachable",
        _ => "Unknown error",
    }
}
