//! GraphQL documents as seen by the client core.
//!
//! Parsing and AST manipulation live outside this workspace. A [`Document`]
//! is an immutable, already-analysed operation: its source text plus the
//! handful of facts the orchestration core needs (operation kind and name,
//! default variable values, operation-level directives, and whether the
//! document touches client-only fields or exports variables).
//!
//! Documents have *identity*: two handles produced by cloning the same
//! [`Document`] share one allocation and compare equal by [`Document::ptr_eq`],
//! while two separately built documents with the same content only compare
//! equal structurally. The transform cache keys on identity.
//!
//! # Example
//!
//! ```
//! use gql_types::{Document, OperationKind};
//! use serde_json::json;
//!
//! let doc = Document::builder(OperationKind::Query, "query GetTodos($first: Int) { todos(first: $first) { id } }")
//!     .name("GetTodos")
//!     .default_variable("first", json!(10))
//!     .build();
//!
//! assert_eq!(doc.operation_name(), Some("GetTodos"));
//! assert!(doc.ptr_eq(&doc.clone()));
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::variables::Variables;

/// The root operation type of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    /// Name of the root data id the cache stores results of this kind under.
    pub fn root_id(&self) -> &'static str {
        match self {
            OperationKind::Query => "ROOT_QUERY",
            OperationKind::Mutation => "ROOT_MUTATION",
            OperationKind::Subscription => "ROOT_SUBSCRIPTION",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Query => write!(f, "query"),
            OperationKind::Mutation => write!(f, "mutation"),
            OperationKind::Subscription => write!(f, "subscription"),
        }
    }
}

/// The immutable content behind a [`Document`] handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentNode {
    pub kind: OperationKind,
    pub source: String,
    pub operation_name: Option<String>,
    /// Default values declared on the operation's variable definitions.
    pub default_variables: Variables,
    /// Operation-level directive names (e.g. `live`).
    pub directives: BTreeSet<String>,
    /// Document selects at least one `@client` field.
    pub has_client_fields: bool,
    /// Document selects at least one field the server must resolve.
    pub has_server_fields: bool,
    /// Document uses `@export` to derive variables locally.
    pub exports_variables: bool,
}

/// Shared, identity-carrying handle to a [`DocumentNode`].
#[derive(Clone)]
pub struct Document(Arc<DocumentNode>);

/// Opaque identity of a [`Document`] allocation.
///
/// Only meaningful while some handle to the document is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(usize);

impl Document {
    pub fn builder(kind: OperationKind, source: impl Into<String>) -> DocumentBuilder {
        DocumentBuilder::new(kind, source)
    }

    pub fn query(source: impl Into<String>) -> DocumentBuilder {
        DocumentBuilder::new(OperationKind::Query, source)
    }

    pub fn mutation(source: impl Into<String>) -> DocumentBuilder {
        DocumentBuilder::new(OperationKind::Mutation, source)
    }

    pub fn subscription(source: impl Into<String>) -> DocumentBuilder {
        DocumentBuilder::new(OperationKind::Subscription, source)
    }

    /// Wrap an already-built node in a fresh identity.
    pub fn from_node(node: DocumentNode) -> Self {
        Self(Arc::new(node))
    }

    pub fn id(&self) -> DocumentId {
        DocumentId(Arc::as_ptr(&self.0) as usize)
    }

    /// A handle that does not keep the document alive.
    pub fn downgrade(&self) -> WeakDocument {
        WeakDocument(Arc::downgrade(&self.0))
    }

    /// Same allocation (identity equality).
    pub fn ptr_eq(&self, other: &Document) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Identity equality, falling back to deep structural equality.
    pub fn same_document(&self, other: &Document) -> bool {
        self.ptr_eq(other) || *self.0 == *other.0
    }

    pub fn operation_name(&self) -> Option<&str> {
        self.0.operation_name.as_deref()
    }

    pub fn has_directive(&self, name: &str) -> bool {
        self.0.directives.contains(name)
    }

    pub fn node(&self) -> &DocumentNode {
        &self.0
    }

    /// Derive a new document (new identity) from this one's content.
    pub fn derive(&self, f: impl FnOnce(&mut DocumentNode)) -> Document {
        let mut node = (*self.0).clone();
        f(&mut node);
        Document::from_node(node)
    }
}

impl Deref for Document {
    type Target = DocumentNode;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("kind", &self.0.kind)
            .field("operation_name", &self.0.operation_name)
            .field("id", &self.id())
            .finish()
    }
}

/// Non-owning counterpart of [`Document`].
///
/// While a `WeakDocument` exists the allocation is not freed, so the
/// [`DocumentId`] it was taken from is not handed to another document.
#[derive(Clone)]
pub struct WeakDocument(Weak<DocumentNode>);

impl WeakDocument {
    pub fn upgrade(&self) -> Option<Document> {
        self.0.upgrade().map(Document)
    }

    /// Number of live [`Document`] handles.
    pub fn strong_count(&self) -> usize {
        self.0.strong_count()
    }

    pub fn id(&self) -> DocumentId {
        DocumentId(self.0.as_ptr() as usize)
    }
}

impl fmt::Debug for WeakDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDocument")
            .field("id", &self.id())
            .field("strong", &self.strong_count())
            .finish()
    }
}

/// Builder for [`Document`].
pub struct DocumentBuilder {
    node: DocumentNode,
}

impl DocumentBuilder {
    pub fn new(kind: OperationKind, source: impl Into<String>) -> Self {
        Self {
            node: DocumentNode {
                kind,
                source: source.into(),
                operation_name: None,
                default_variables: Variables::new(),
                directives: BTreeSet::new(),
                has_client_fields: false,
                has_server_fields: true,
                exports_variables: false,
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.node.operation_name = Some(name.to_string());
        self
    }

    pub fn default_variable(mut self, name: &str, value: Value) -> Self {
        self.node.default_variables.insert(name.to_string(), value);
        self
    }

    pub fn directive(mut self, name: &str) -> Self {
        self.node.directives.insert(name.to_string());
        self
    }

    /// Mark the document as selecting `@client` fields alongside server fields.
    pub fn client_fields(mut self) -> Self {
        self.node.has_client_fields = true;
        self
    }

    /// Mark the document as entirely client-resolved (no server part).
    pub fn client_only(mut self) -> Self {
        self.node.has_client_fields = true;
        self.node.has_server_fields = false;
        self
    }

    pub fn exports_variables(mut self) -> Self {
        self.node.exports_variables = true;
        self
    }

    pub fn build(self) -> Document {
        Document::from_node(self.node)
    }
}
