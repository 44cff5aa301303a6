//! Shared protocol constants for the cmdlink line transport

// Default field separators
pub const COMMAND_SEPARATOR: &str = "__+__";
pub const OUTPUT_SEPARATOR: &str = "__$__";
pub const ARGUMENT_SEPARATOR: &str = "__*__";

// Form field naming the web handler to run
pub const WEB_COMMAND_FIELD: &str = "WebCommand";

pub const DEFAULT_PORT: u16 = 1997;

// Any payload containing this marker is a failure, never data
pub const ERROR_MARKER: &str = "Error:";

// Handshake vocabulary. Keep literal for compat with existing clients.
pub mod auth {
    pub const STEP1: &str = "AuthStep1";
    pub const STEP2: &str = "AuthStep2";
    pub const STEP1_REQUEST: &str = "please";
    pub const STEP2_ACCEPTED: &str = "ok";

    // Challenge file names live under the challenge dir as auth_<random>
    pub const FILE_PREFIX: &str = "auth_";
    pub const NAME_LEN_MIN: usize = 10;
    pub const NAME_LEN_MAX: usize = 16;
    pub const SECRET_LEN_MIN: usize = 64;
    pub const SECRET_LEN_MAX: usize = 128;
}

// Web form shim markers
pub mod web {
    pub const POST_MARKER: &str = "POST /";
    pub const END_OF_FORM: &str = "Submit+This+Form";
    pub const HEADER_FOOTER_SEPARATOR: &str = "__HFSEPARATOR__";
    pub const ERROR_TITLE: &str = "ERROR";
}
