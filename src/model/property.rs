//! Property keys: the well-known catalogue plus free-form names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{Value, ValueType};
use crate::{Error, Result};

// ============================================================================
// Enumerated vocabularies
// ============================================================================

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $label:literal { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(Error::Parse { input: s.to_owned(), target: $label.into() }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(s: String) -> Result<Self> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> Self {
                v.as_str().to_owned()
            }
        }

        impl From<$name> for Value {
            fn from(v: $name) -> Self {
                Value::from(v.as_str())
            }
        }
    };
}

string_enum!(
    /// Signal direction, seen from the owning device.
    Direction, "direction" { Input => "input", Output => "output" }
);

string_enum!(
    /// Voice-stealing policy for a signal's instance pool.
    #[derive(Default)]
    StealMode, "steal mode" { #[default] None => "none", Oldest => "oldest", Newest => "newest" }
);

string_enum!(
    /// Where a map's expression is evaluated.
    ProcessLocation, "process location" { Source => "src", Destination => "dst", Any => "any" }
);

string_enum!(
    Protocol, "protocol" { Udp => "osc.udp", Tcp => "osc.tcp" }
);

string_enum!(
    /// What a map slot does with values outside its bounds.
    BoundaryAction, "boundary action" {
        None => "none",
        Mute => "mute",
        Clamp => "clamp",
        Fold => "fold",
        Wrap => "wrap",
    }
);

// ============================================================================
// Well-known properties
// ============================================================================

/// The kind a well-known property accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindConstraint {
    Exact(ValueType),
    /// Any numeric kind (`@min`, `@max`).
    Numeric,
}

/// Catalogue entry for a well-known property.
#[derive(Debug, Clone, Copy)]
pub struct PropertyInfo {
    pub name: &'static str,
    pub kind: KindConstraint,
    /// Required vector length, if fixed.
    pub arity: Option<usize>,
}

macro_rules! properties {
    ($($variant:ident => $name:literal, $kind:expr, $arity:expr;)+) => {
        /// Well-known property identifiers.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum Property {
            $($variant),+
        }

        impl Property {
            pub const ALL: &'static [Property] = &[$(Property::$variant),+];

            pub fn info(self) -> PropertyInfo {
                match self {
                    $(Property::$variant => PropertyInfo { name: $name, kind: $kind, arity: $arity }),+
                }
            }
        }
    };
}

use KindConstraint::{Exact, Numeric};
use ValueType as T;

properties! {
    BoundMax    => "@bound_max",    Exact(T::String),  Some(1);
    BoundMin    => "@bound_min",    Exact(T::String),  Some(1);
    Device      => "@device",       Exact(T::Int64),   Some(1);
    Devices     => "@devices",      Exact(T::Int64),   Some(2);
    Destination => "@destination",  Exact(T::Int64),   Some(1);
    Direction   => "@direction",    Exact(T::String),  Some(1);
    Ephemeral   => "@ephemeral",    Exact(T::Bool),    Some(1);
    Expr        => "@expr",         Exact(T::String),  Some(1);
    Host        => "@host",         Exact(T::String),  Some(1);
    Id          => "@id",           Exact(T::Int64),   Some(1);
    IsLocal     => "@is_local",     Exact(T::Bool),    Some(1);
    Jitter      => "@jitter",       Exact(T::Float32), Some(1);
    Length      => "@length",       Exact(T::Int32),   Some(1);
    LibVersion  => "@lib_version",  Exact(T::String),  Some(1);
    Max         => "@max",          Numeric,           None;
    Min         => "@min",          Numeric,           None;
    Muted       => "@muted",        Exact(T::Bool),    Some(1);
    Name        => "@name",         Exact(T::String),  Some(1);
    NumInst     => "@num_inst",     Exact(T::Int32),   Some(1);
    NumMapsIn   => "@num_maps_in",  Exact(T::Int32),   Some(1);
    NumMapsOut  => "@num_maps_out", Exact(T::Int32),   Some(1);
    NumSigsIn   => "@num_sigs_in",  Exact(T::Int32),   Some(1);
    NumSigsOut  => "@num_sigs_out", Exact(T::Int32),   Some(1);
    Ordinal     => "@ordinal",      Exact(T::Int32),   Some(1);
    Period      => "@period",       Exact(T::Float32), Some(1);
    Port        => "@port",         Exact(T::Int32),   Some(1);
    ProcessLoc  => "@process_loc",  Exact(T::String),  Some(1);
    Protocol    => "@protocol",     Exact(T::String),  Some(1);
    Rate        => "@rate",         Exact(T::Float32), Some(1);
    Scope       => "@scope",        Exact(T::String),  None;
    Sources     => "@sources",      Exact(T::Int64),   None;
    Steal       => "@steal",        Exact(T::String),  Some(1);
    Synced      => "@synced",       Exact(T::Time),    Some(1);
    Type        => "@type",         Exact(T::String),  Some(1);
    Unit        => "@unit",         Exact(T::String),  Some(1);
    UseInst     => "@use_inst",     Exact(T::Bool),    Some(1);
    Version     => "@version",      Exact(T::Int32),   Some(1);
}

impl Property {
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Look up by name, with or without the leading `@`. A few long-form
    /// aliases are accepted too.
    pub fn from_name(name: &str) -> Option<Property> {
        let bare = name.strip_prefix('@').unwrap_or(name);
        match bare {
            "expression" => return Some(Property::Expr),
            "maximum" => return Some(Property::Max),
            "minimum" => return Some(Property::Min),
            _ => {}
        }
        Property::ALL.iter().copied().find(|p| &p.name()[1..] == bare)
    }

    /// Check `value` against the catalogue: kind, arity and, for enumerated
    /// properties, vocabulary.
    pub fn validate(self, value: &Value) -> Result<()> {
        let info = self.info();
        let kind_ok = match info.kind {
            Exact(kind) => value.kind() == kind,
            Numeric => value.is_numeric(),
        };
        if !kind_ok {
            let expected = match info.kind {
                Exact(kind) => kind.to_string(),
                Numeric => "numeric".to_string(),
            };
            return Err(Error::TypeMismatch {
                expected: format!("{expected} for {}", info.name),
                got: value.kind().to_string(),
            });
        }
        if let Some(n) = info.arity {
            if value.len() != n {
                return Err(Error::TypeMismatch {
                    expected: format!("length {n} for {}", info.name),
                    got: format!("length {}", value.len()),
                });
            }
        }

        let Some(strs) = value.as_strs() else {
            return Ok(());
        };
        for s in strs {
            match self {
                Property::Direction => {
                    let _: self::Direction = s.parse()?;
                }
                Property::Steal => {
                    let _: StealMode = s.parse()?;
                }
                Property::ProcessLoc => {
                    let _: ProcessLocation = s.parse()?;
                }
                Property::Protocol => {
                    let _: self::Protocol = s.parse()?;
                }
                Property::BoundMax | Property::BoundMin => {
                    let _: BoundaryAction = s.parse()?;
                }
                Property::Type => {
                    let _: ValueType = s.parse()?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// PropertyKey
// ============================================================================

/// Key of a property table entry: a well-known id or a free-form name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PropertyKey {
    WellKnown(Property),
    Named(String),
}

impl PropertyKey {
    pub fn well_known(&self) -> Option<Property> {
        match self {
            PropertyKey::WellKnown(p) => Some(*p),
            PropertyKey::Named(_) => None,
        }
    }

    /// Validate a value for this key. Free-form keys accept anything.
    pub fn validate(&self, value: &Value) -> Result<()> {
        match self {
            PropertyKey::WellKnown(p) => p.validate(value),
            PropertyKey::Named(_) => Ok(()),
        }
    }
}

impl From<Property> for PropertyKey {
    fn from(p: Property) -> Self {
        PropertyKey::WellKnown(p)
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        match Property::from_name(s) {
            Some(p) => PropertyKey::WellKnown(p),
            None => PropertyKey::Named(s.to_owned()),
        }
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        match Property::from_name(&s) {
            Some(p) => PropertyKey::WellKnown(p),
            None => PropertyKey::Named(s),
        }
    }
}

impl From<&PropertyKey> for PropertyKey {
    fn from(k: &PropertyKey) -> Self {
        k.clone()
    }
}

impl From<PropertyKey> for String {
    fn from(k: PropertyKey) -> Self {
        k.to_string()
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::WellKnown(p) => f.write_str(p.name()),
            PropertyKey::Named(s) => f.write_str(s),
        }
    }
}
