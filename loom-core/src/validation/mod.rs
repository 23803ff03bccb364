//! C2: symbol metadata validation.

pub mod symbol_validator;

pub use symbol_validator::{AdjustedOrder, ExchangeLimits, SymbolInfo, SymbolValidator};
