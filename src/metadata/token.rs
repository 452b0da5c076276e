//! Metadata tokens.
//!
//! A [`Token`] names a callable method: the high byte selects the table, the low 24 bits the
//! row. Tokens are what `call` instructions carry and what [`crate::patch::DetourHost`]
//! implementations hand out for methods and imported hooks.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Largest row index a token can carry.
pub const MAX_ROW: u32 = 0x00FF_FFFF;

/// Table id of method definitions (methods with an IL body).
pub const TABLE_METHOD_DEF: u8 = 0x06;

/// Table id of member references (native methods and imported hooks).
pub const TABLE_MEMBER_REF: u8 = 0x0A;

/// A metadata token identifying a callable method.
///
/// Tokens consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
///
/// IL methods live in the [`TABLE_METHOD_DEF`] table, native methods (including imported
/// hooks) in the [`TABLE_MEMBER_REF`] table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table id and a row index
    #[must_use]
    pub const fn from_parts(table: u8, row: u32) -> Self {
        Token(((table as u32) << 24) | (row & MAX_ROW))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & MAX_ROW
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if the token refers to a method with an IL body
    #[must_use]
    pub fn is_method_def(&self) -> bool {
        self.table() == TABLE_METHOD_DEF
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}
