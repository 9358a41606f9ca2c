// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DBR data type codes and their wire sizes.
//!
//! Seven primitive value types (string, short, float, enum, char, long,
//! double) come in five classes: plain value, status (+7), time (+14),
//! graphic (+21) and control (+28). Codes 35..=38 are special purpose.
//!
//! The core never interprets value payloads; it only needs sizes to check
//! that request bodies and response bodies match their declared type/count.

use std::fmt;

use crate::error::{Error, Result};

pub const STRING: u16 = 0;
pub const SHORT: u16 = 1;
pub const FLOAT: u16 = 2;
pub const ENUM: u16 = 3;
pub const CHAR: u16 = 4;
pub const LONG: u16 = 5;
pub const DOUBLE: u16 = 6;

pub const PUT_ACKT: u16 = 35;
pub const PUT_ACKS: u16 = 36;
pub const STSACK_STRING: u16 = 37;
pub const CLASS_NAME: u16 = 38;

/// Highest valid type code.
pub const LAST_TYPE: u16 = CLASS_NAME;

/// Fixed length of a string element.
pub const MAX_STRING_SIZE: usize = 40;

const CLASS_STRIDE: u16 = 7;

// Per primitive, indexed by code % 7.
const VALUE_SIZE: [usize; 7] = [MAX_STRING_SIZE, 2, 4, 2, 1, 4, 8];

// Header plus one element, indexed [class][primitive].
const DBR_SIZE: [[usize; 7]; 5] = [
    [40, 2, 4, 2, 1, 4, 8],
    [44, 6, 8, 6, 6, 8, 16],
    [52, 16, 16, 16, 16, 16, 24],
    [44, 26, 44, 422, 20, 40, 72],
    [44, 30, 52, 422, 22, 48, 88],
];

/// Value class of a DBR type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbrClass {
    Plain,
    Status,
    Time,
    Graphic,
    Control,
    Special,
}

/// Validated DBR type code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DbrType(u16);

impl DbrType {
    pub const STRING: DbrType = DbrType(STRING);
    pub const SHORT: DbrType = DbrType(SHORT);
    pub const FLOAT: DbrType = DbrType(FLOAT);
    pub const ENUM: DbrType = DbrType(ENUM);
    pub const CHAR: DbrType = DbrType(CHAR);
    pub const LONG: DbrType = DbrType(LONG);
    pub const DOUBLE: DbrType = DbrType(DOUBLE);

    /// Validate a type code. Codes above 38 are rejected.
    pub fn new(code: u16) -> Result<Self> {
        if code > LAST_TYPE {
            return Err(Error::BadType(code));
        }
        Ok(Self(code))
    }

    pub const fn code(self) -> u16 {
        self.0
    }

    pub fn class(self) -> DbrClass {
        match self.0 / CLASS_STRIDE {
            0 => DbrClass::Plain,
            1 => DbrClass::Status,
            2 => DbrClass::Time,
            3 => DbrClass::Graphic,
            4 => DbrClass::Control,
            _ => DbrClass::Special,
        }
    }

    /// Size of one value element.
    pub fn element_size(self) -> usize {
        match self.0 {
            PUT_ACKT | PUT_ACKS => 2,
            STSACK_STRING | CLASS_NAME => MAX_STRING_SIZE,
            code => VALUE_SIZE[usize::from(code % CLASS_STRIDE)],
        }
    }

    /// Size of the structure carrying one element (metadata plus value).
    pub fn size(self) -> usize {
        match self.0 {
            PUT_ACKT | PUT_ACKS => 2,
            STSACK_STRING => 48,
            CLASS_NAME => MAX_STRING_SIZE,
            code => {
                let class = usize::from(code / CLASS_STRIDE);
                DBR_SIZE[class][usize::from(code % CLASS_STRIDE)]
            }
        }
    }

    /// Size of the structure carrying `count` elements.
    ///
    /// A count of zero is sized as one element.
    pub fn size_n(self, count: u32) -> usize {
        let extra = count.saturating_sub(1) as usize;
        self.size() + extra * self.element_size()
    }

    /// Types a client may send in a write request.
    pub fn is_writable(self) -> bool {
        self.0 <= DOUBLE || self.0 == PUT_ACKT || self.0 == PUT_ACKS
    }

    pub fn name(self) -> &'static str {
        const NAMES: [&str; 39] = [
            "DBR_STRING",
            "DBR_SHORT",
            "DBR_FLOAT",
            "DBR_ENUM",
            "DBR_CHAR",
            "DBR_LONG",
            "DBR_DOUBLE",
            "DBR_STS_STRING",
            "DBR_STS_SHORT",
            "DBR_STS_FLOAT",
            "DBR_STS_ENUM",
            "DBR_STS_CHAR",
            "DBR_STS_LONG",
            "DBR_STS_DOUBLE",
            "DBR_TIME_STRING",
            "DBR_TIME_SHORT",
            "DBR_TIME_FLOAT",
            "DBR_TIME_ENUM",
            "DBR_TIME_CHAR",
            "DBR_TIME_LONG",
            "DBR_TIME_DOUBLE",
            "DBR_GR_STRING",
            "DBR_GR_SHORT",
            "DBR_GR_FLOAT",
            "DBR_GR_ENUM",
            "DBR_GR_CHAR",
            "DBR_GR_LONG",
            "DBR_GR_DOUBLE",
            "DBR_CTRL_STRING",
            "DBR_CTRL_SHORT",
            "DBR_CTRL_FLOAT",
            "DBR_CTRL_ENUM",
            "DBR_CTRL_CHAR",
            "DBR_CTRL_LONG",
            "DBR_CTRL_DOUBLE",
            "DBR_PUT_ACKT",
            "DBR_PUT_ACKS",
            "DBR_STSACK_STRING",
            "DBR_CLASS_NAME",
        ];
        NAMES[usize::from(self.0)]
    }
}

impl TryFrom<u16> for DbrType {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self> {
        Self::new(code)
    }
}

impl fmt::Debug for DbrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for DbrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
