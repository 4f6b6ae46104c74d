//! Path stack
//!
//! One frame per promoted level between the model root and the queried
//! collection. Built once per compilation and shared by every generator.

use crate::schema::{join_path, Model};

use super::errors::{PipelineError, PipelineResult};

/// One nesting depth
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Path relative to the previous frame, `None` for the root
    pub prefix: Option<String>,
    /// Absolute path in the model, `None` for the root
    pub path: Option<String>,
    /// Flattened paths owned by this frame, relative to it
    pub as_fields: Vec<String>,
    /// Promoted paths owned by this frame, relative to it
    pub as_models: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PathStack<'m> {
    model: &'m Model,
    frames: Vec<Frame>,
}

impl<'m> PathStack<'m> {
    /// Stack for `level` of `model`; `None` is the model root.
    pub fn build(model: &'m Model, level: Option<&str>) -> PipelineResult<Self> {
        let chain = match level {
            None => Vec::new(),
            Some(path) if model.is_promoted(path) => model.promoted_chain(path),
            Some(path) => {
                return Err(PipelineError::InvalidStack(format!(
                    "'{}' is not a promoted path of model '{}'",
                    path, model.name
                )))
            }
        };

        let root = model.children(None);
        let mut frames = vec![Frame {
            prefix: None,
            path: None,
            as_fields: root.as_fields,
            as_models: root.as_models,
        }];

        let mut previous: Option<&str> = None;
        for path in chain {
            let prefix = match previous {
                Some(parent) => path[parent.len() + 1..].to_string(),
                None => path.to_string(),
            };
            let children = model.children(Some(path));
            frames.push(Frame {
                prefix: Some(prefix),
                path: Some(path.to_string()),
                as_fields: children.as_fields,
                as_models: children.as_models,
            });
            previous = Some(path);
        }

        Ok(Self { model, frames })
    }

    pub fn model(&self) -> &'m Model {
        self.model
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The queried level
    pub fn current(&self) -> &Frame {
        // never empty: the root frame is always pushed
        &self.frames[self.frames.len() - 1]
    }

    pub fn level(&self) -> Option<&str> {
        self.current().path.as_deref()
    }

    pub fn collection_name(&self) -> String {
        self.model.flattened_name(self.level())
    }

    /// Cursor on the queried record, chained to every frame above it
    pub fn cursor(&self) -> Cursor<'m> {
        let depth = self.frames.len();
        let mut cursor: Option<Cursor<'m>> = None;
        for (i, frame) in self.frames.iter().enumerate() {
            let hops = depth - 1 - i;
            let doc_path = (hops > 0).then(|| vec!["parent"; hops].join("."));
            cursor = Some(Cursor {
                model: self.model,
                level: frame.path.clone(),
                doc_path,
                origin: CursorOrigin::Frame,
                parent: cursor.map(Box::new),
            });
        }
        cursor.unwrap_or_else(|| Cursor::root(self.model))
    }
}

/// How the record under a cursor got into the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOrigin {
    /// A frame of the stack: fully materialized by reparenting
    Frame,
    /// Still embedded in its container; synthetic fields are computed
    Embedded,
    /// Joined from another collection
    Lookup,
}

/// A record reachable from the queried record, and where it sits in the
/// current document.
#[derive(Debug, Clone)]
pub struct Cursor<'m> {
    pub model: &'m Model,
    /// Promoted path in `model`, `None` for the root
    pub level: Option<String>,
    /// Dotted document path, `None` for the document itself
    pub doc_path: Option<String>,
    pub origin: CursorOrigin,
    pub parent: Option<Box<Cursor<'m>>>,
}

impl<'m> Cursor<'m> {
    pub fn root(model: &'m Model) -> Self {
        Self {
            model,
            level: None,
            doc_path: None,
            origin: CursorOrigin::Frame,
            parent: None,
        }
    }

    pub fn collection_name(&self) -> String {
        self.model.flattened_name(self.level.as_deref())
    }

    /// Document path of a field of this record
    pub fn field_path(&self, name: &str) -> String {
        join_path(self.doc_path.as_deref(), name)
    }

    /// Nearest cursor that is not embedded, and the path from it to this one
    pub fn anchor(&self) -> (&Cursor<'m>, String) {
        let mut anchor = self;
        while anchor.origin == CursorOrigin::Embedded {
            match &anchor.parent {
                Some(parent) => anchor = &**parent,
                None => break,
            }
        }
        let level = self.level.as_deref().unwrap_or_default();
        let relative = match anchor.level.as_deref() {
            Some(base) if level.len() > base.len() => level[base.len() + 1..].to_string(),
            Some(_) => String::new(),
            None => level.to_string(),
        };
        (anchor, relative)
    }
}
