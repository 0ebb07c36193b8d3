//! Well-known index groups and ADS return codes.

/// Get a 4-byte handle for the symbol name in the write data.
pub const SYM_HNDBYNAME: u32 = 0xF003;
/// Read a symbol value by its null-terminated name.
pub const SYM_VALBYNAME: u32 = 0xF004;
/// Read/write a symbol value by handle (handle goes in the index offset).
pub const SYM_VALBYHND: u32 = 0xF005;
/// Release a symbol handle.
pub const SYM_RELEASEHND: u32 = 0xF006;
/// Symbol table version counter (4 bytes).
pub const SYM_VERSION: u32 = 0xF008;
/// Full symbol table upload.
pub const SYM_UPLOAD: u32 = 0xF00B;
/// Symbol upload info: count and table size.
pub const SYM_UPLOADINFO: u32 = 0xF00C;

/// Sum command: many reads in one frame.
pub const SUMUP_READ: u32 = 0xF080;
/// Sum command: many writes in one frame.
pub const SUMUP_WRITE: u32 = 0xF081;
/// Sum command: many write+reads in one frame.
pub const SUMUP_READWRITE: u32 = 0xF082;

/// Size of the block returned by [`SYM_UPLOADINFO`].
pub const UPLOAD_INFO_LEN: u32 = 24;

/// Default AMS port of the first TwinCAT 3 PLC runtime.
pub const DEFAULT_PLC_PORT: u16 = 851;

/// ADS return codes the engine interprets.
pub mod codes {
    /// No error.
    pub const NOERR: u32 = 0x0000;
    /// Target port not found.
    pub const TARGET_PORT_NOT_FOUND: u32 = 0x0006;
    /// Target machine not found.
    pub const TARGET_MACHINE_NOT_FOUND: u32 = 0x0007;
    /// General device error.
    pub const DEVICE_ERROR: u32 = 0x0700;
    /// Service is not supported by the server.
    pub const SRV_NOT_SUPP: u32 = 0x0701;
    /// Invalid index group.
    pub const INVALID_GRP: u32 = 0x0702;
    /// Invalid index offset.
    pub const INVALID_OFFSET: u32 = 0x0703;
    /// Reading or writing not permitted.
    pub const INVALID_ACCESS: u32 = 0x0704;
    /// Parameter size not correct.
    pub const INVALID_SIZE: u32 = 0x0705;
    /// Symbol not found.
    pub const SYMBOL_NOT_FOUND: u32 = 0x0710;
    /// Symbol version invalid: the symbol table changed and handles are stale.
    pub const SYMBOL_VERSION_INVALID: u32 = 0x0711;
    /// Device is in an invalid state.
    pub const INVALID_STATE: u32 = 0x0712;
    /// Handle is invalid.
    pub const INVALID_HANDLE: u32 = 0x0714;
    /// Device timeout.
    pub const TIMEOUT: u32 = 0x0719;

    /// Symbolic name of a well-known code.
    #[must_use]
    pub fn name(code: u32) -> Option<&'static str> {
        Some(match code {
            NOERR => "no error",
            TARGET_PORT_NOT_FOUND => "target port not found",
            TARGET_MACHINE_NOT_FOUND => "target machine not found",
            DEVICE_ERROR => "general device error",
            SRV_NOT_SUPP => "service not supported",
            INVALID_GRP => "invalid index group",
            INVALID_OFFSET => "invalid index offset",
            INVALID_ACCESS => "access denied",
            INVALID_SIZE => "invalid size",
            SYMBOL_NOT_FOUND => "symbol not found",
            SYMBOL_VERSION_INVALID => "symbol version invalid",
            INVALID_STATE => "invalid device state",
            INVALID_HANDLE => "invalid handle",
            TIMEOUT => "device timeout",
            _ => return None,
        })
    }
}
