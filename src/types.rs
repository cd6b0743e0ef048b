//! Method descriptor parsing and the type-code alphabet
//!
//! Descriptors use the compact `(IJLjava/lang/String;)V` form carried by the
//! program image. Every parameter and return type collapses to a one-letter
//! type code; objects and arrays both collapse to `L` since the recorder
//! treats every reference through the same probe.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One-letter type codes for parameters and return values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeCode {
    /// 8-bit integer (`B`)
    Byte,
    /// 16-bit integer (`S`)
    Short,
    /// 32-bit integer (`I`)
    Int,
    /// 64-bit integer (`J`), occupies two stack slots
    Long,
    /// 32-bit float (`F`)
    Float,
    /// 64-bit float (`D`), occupies two stack slots
    Double,
    /// Character (`C`) - not folded into Int, textual rendering differs
    Char,
    /// Boolean (`Z`) - not folded into Int either
    Bool,
    /// Object reference or array (`L`)
    Ref,
    /// No value (`V`), return position only
    Void,
}

impl TypeCode {
    /// The catalog-file letter for this code
    pub fn as_char(self) -> char {
        match self {
            TypeCode::Byte => 'B',
            TypeCode::Short => 'S',
            TypeCode::Int => 'I',
            TypeCode::Long => 'J',
            TypeCode::Float => 'F',
            TypeCode::Double => 'D',
            TypeCode::Char => 'C',
            TypeCode::Bool => 'Z',
            TypeCode::Ref => 'L',
            TypeCode::Void => 'V',
        }
    }

    /// True for the 64-bit codes that take two stack slots
    pub fn is_wide(self) -> bool {
        matches!(self, TypeCode::Long | TypeCode::Double)
    }
}

/// Errors raised while parsing a method descriptor
///
/// A descriptor that fails to parse is fatal to that one method's
/// instrumentation: the rewriter leaves the method unmodified rather than
/// emitting a partially rewritten body.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("descriptor {0:?} has unbalanced parentheses")]
    Unbalanced(String),
    #[error("descriptor {descriptor:?} contains unknown type code {code:?}")]
    UnknownCode { descriptor: String, code: char },
    #[error("descriptor {0:?} ends mid-type")]
    Truncated(String),
}

/// A parsed method descriptor: parameter codes in declaration order plus the
/// return code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub params: Vec<TypeCode>,
    pub ret: TypeCode,
}

impl Descriptor {
    /// Parse a `(IJLjava/lang/String;)V`-form descriptor
    pub fn parse(desc: &str) -> Result<Self, DescriptorError> {
        let open = desc.find('(');
        let close = desc.rfind(')');
        let (inner, ret_str) = match (open, close) {
            (Some(o), Some(c)) if o < c => (&desc[o + 1..c], &desc[c + 1..]),
            _ => return Err(DescriptorError::Unbalanced(desc.to_string())),
        };

        let params = parse_type_sequence(desc, inner)?;
        let ret_codes = parse_type_sequence(desc, ret_str)?;
        let ret = match ret_codes.as_slice() {
            [one] => *one,
            _ => return Err(DescriptorError::Truncated(desc.to_string())),
        };

        Ok(Descriptor { params, ret })
    }

    /// The catalog rendering of the parameter codes, `-` when there are none
    pub fn param_string(&self) -> String {
        if self.params.is_empty() {
            "-".to_string()
        } else {
            self.params.iter().map(|c| c.as_char()).collect()
        }
    }
}

/// Parse a run of field-type descriptors into type codes
///
/// Arrays (`[` prefixes) and object types (`L...;`) both collapse to
/// [`TypeCode::Ref`]; the recorder special-cases arrays at capture time, not
/// here.
fn parse_type_sequence(desc: &str, mut s: &str) -> Result<Vec<TypeCode>, DescriptorError> {
    let mut codes = Vec::new();
    while let Some(c) = s.chars().next() {
        match c {
            'B' => codes.push(TypeCode::Byte),
            'S' => codes.push(TypeCode::Short),
            'I' => codes.push(TypeCode::Int),
            'J' => codes.push(TypeCode::Long),
            'F' => codes.push(TypeCode::Float),
            'D' => codes.push(TypeCode::Double),
            'C' => codes.push(TypeCode::Char),
            'Z' => codes.push(TypeCode::Bool),
            'V' => codes.push(TypeCode::Void),
            '[' => {
                // Consume the array prefix run and the element type as one Ref
                let rest = s.trim_start_matches('[');
                match rest.chars().next() {
                    Some('L') => {
                        let semi = rest
                            .find(';')
                            .ok_or_else(|| DescriptorError::Truncated(desc.to_string()))?;
                        s = &rest[semi + 1..];
                    }
                    Some(p) if "BSIJFDCZ".contains(p) => {
                        s = &rest[1..];
                    }
                    _ => return Err(DescriptorError::Truncated(desc.to_string())),
                }
                codes.push(TypeCode::Ref);
                continue;
            }
            'L' => {
                let semi = s
                    .find(';')
                    .ok_or_else(|| DescriptorError::Truncated(desc.to_string()))?;
                s = &s[semi + 1..];
                codes.push(TypeCode::Ref);
                continue;
            }
            other => {
                return Err(DescriptorError::UnknownCode {
                    descriptor: desc.to_string(),
                    code: other,
                })
            }
        }
        s = &s[1..];
    }
    Ok(codes)
}
