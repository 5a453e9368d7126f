//! Namespace resolver and the semantic-token legend.
//!
//! The analyzer reports a short kind code per token (`"Id"`, `"Cm"`, ...) and a
//! single flag per batch choosing between two display namespaces. Both
//! namespaces share one catalog of [`TokenKind`]s; the flat identifiers the
//! renderer registers (`ttxId`, `cppId`, ...) are only computed here, at the
//! boundary.

use std::fmt;

use serde::Serialize;

/// Lexical category reported by the analyzer, independent of namespace.
///
/// Declaration order is the legend order and must not change: legend indices
/// are derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Identifier,
    Parameter,
    FunctionCall,
    Member,
    DefinitionType,
    DefinitionId,
    Comment,
    Disabled,
    Import,
    PackageName,
    Constant,
    Dynamic,
    Hidden,
    Temporary,
    String,
    Int,
    Number,
    Type,
    Attribute,
    This,
    Definition,
    Keyword,
    Modifier,
    Operation,
    Check,
    EndStatement,
    ScopeStart,
    ScopeEnd,
    GroupStart,
    GroupEnd,
    IndexStart,
    IndexEnd,
    Logical,
    Separator,
}

impl TokenKind {
    pub const ALL: [Self; 34] = [
        Self::Identifier,
        Self::Parameter,
        Self::FunctionCall,
        Self::Member,
        Self::DefinitionType,
        Self::DefinitionId,
        Self::Comment,
        Self::Disabled,
        Self::Import,
        Self::PackageName,
        Self::Constant,
        Self::Dynamic,
        Self::Hidden,
        Self::Temporary,
        Self::String,
        Self::Int,
        Self::Number,
        Self::Type,
        Self::Attribute,
        Self::This,
        Self::Definition,
        Self::Keyword,
        Self::Modifier,
        Self::Operation,
        Self::Check,
        Self::EndStatement,
        Self::ScopeStart,
        Self::ScopeEnd,
        Self::GroupStart,
        Self::GroupEnd,
        Self::IndexStart,
        Self::IndexEnd,
        Self::Logical,
        Self::Separator,
    ];

    /// Wire code used by the analyzer.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Identifier => "Id",
            Self::Parameter => "P",
            Self::FunctionCall => "Fu",
            Self::Member => "Me",
            Self::DefinitionType => "DT",
            Self::DefinitionId => "DI",
            Self::Comment => "Cm",
            Self::Disabled => "Dis",
            Self::Import => "In",
            Self::PackageName => "Nm",
            Self::Constant => "M1",
            Self::Dynamic => "M2",
            Self::Hidden => "M3",
            Self::Temporary => "M4",
            Self::String => "S",
            Self::Int => "I",
            Self::Number => "N",
            Self::Type => "T",
            Self::Attribute => "A",
            Self::This => "Z",
            Self::Definition => "D",
            Self::Keyword => "K",
            Self::Modifier => "M",
            Self::Operation => "O",
            Self::Check => "C",
            Self::EndStatement => "E",
            Self::ScopeStart => "SS",
            Self::ScopeEnd => "SE",
            Self::GroupStart => "GS",
            Self::GroupEnd => "GE",
            Self::IndexStart => "IS",
            Self::IndexEnd => "IE",
            Self::Logical => "L",
            Self::Separator => "_",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Position of this kind within one namespace of the legend.
    #[must_use]
    pub const fn ordinal(self) -> u32 {
        self as u32
    }
}

/// Which of the two display namespaces a token batch is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Namespace {
    /// Tetrodotoxin categories (`ttx*`).
    #[default]
    Primary,
    /// Embedded C++-themed categories (`cpp*`).
    Alternate,
}

impl Namespace {
    pub const ALL: [Self; 2] = [Self::Primary, Self::Alternate];

    #[must_use]
    pub const fn from_alternate_flag(uses_alternate: bool) -> Self {
        if uses_alternate {
            Self::Alternate
        } else {
            Self::Primary
        }
    }

    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Primary => "ttx",
            Self::Alternate => "cpp",
        }
    }

    const fn offset(self) -> u32 {
        match self {
            Self::Primary => 0,
            Self::Alternate => TokenKind::ALL.len() as u32,
        }
    }
}

/// A resolved display category: one kind within one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayCategory {
    namespace: Namespace,
    kind: TokenKind,
}

impl DisplayCategory {
    #[must_use]
    pub const fn new(namespace: Namespace, kind: TokenKind) -> Self {
        Self { namespace, kind }
    }

    #[must_use]
    pub const fn namespace(self) -> Namespace {
        self.namespace
    }

    #[must_use]
    pub const fn kind(self) -> TokenKind {
        self.kind
    }

    /// Index of this category in [`Legend::standard`]'s token types.
    #[must_use]
    pub const fn legend_index(self) -> u32 {
        self.namespace.offset() + self.kind.ordinal()
    }
}

impl fmt::Display for DisplayCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.namespace.prefix(), self.kind.code())
    }
}

/// A kind code with no category in the active namespace.
///
/// Soft failure: the caller drops the token and logs the identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown token type: {identifier}")]
pub struct UnknownCategory {
    identifier: String,
}

impl UnknownCategory {
    /// The flat identifier that failed to resolve, e.g. `cppXyz`.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Resolve a wire kind code within a namespace.
pub fn resolve(namespace: Namespace, code: &str) -> Result<DisplayCategory, UnknownCategory> {
    TokenKind::from_code(code)
        .map(|kind| DisplayCategory::new(namespace, kind))
        .ok_or_else(|| UnknownCategory {
            identifier: format!("{}{code}", namespace.prefix()),
        })
}

/// Token modifiers registered alongside the token types. The analyzer never
/// sets them today; they are part of the registered legend.
pub const TOKEN_MODIFIERS: &[&str] = &["declaration", "documentation"];

/// The ordered catalog registered with the rendering host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Legend {
    token_types: Vec<String>,
    token_modifiers: Vec<String>,
}

impl Legend {
    /// Primary categories in kind order, then alternate categories in the same
    /// order.
    #[must_use]
    pub fn standard() -> Self {
        let token_types = Namespace::ALL
            .into_iter()
            .flat_map(|ns| {
                TokenKind::ALL
                    .into_iter()
                    .map(move |kind| DisplayCategory::new(ns, kind).to_string())
            })
            .collect();
        Self {
            token_types,
            token_modifiers: TOKEN_MODIFIERS.iter().map(|m| (*m).to_string()).collect(),
        }
    }

    #[must_use]
    pub fn token_types(&self) -> &[String] {
        &self.token_types
    }

    #[must_use]
    pub fn token_modifiers(&self) -> &[String] {
        &self.token_modifiers
    }

    #[must_use]
    pub fn index_of(&self, identifier: &str) -> Option<u32> {
        self.token_types
            .iter()
            .position(|t| t == identifier)
            .map(|i| i as u32)
    }
}
