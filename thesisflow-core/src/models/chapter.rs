use serde::{Deserialize, Serialize};

/// A leaf content unit stored at `chapters/<chapter id>/<filename>`.
///
/// Paragraphs are owned by exactly one [`Chapter`]; their `id` is unique within
/// that chapter and never derived from the title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub filename: String,
}

/// A chapter: a body file at `chapters/<filename>` followed by its paragraphs.
///
/// The order of `paragraphs` is document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub filename: String,
    #[serde(default)]
    pub paragraphs: Vec<Paragraph>,
}

impl Chapter {
    pub fn new(id: impl Into<String>, title: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            filename: filename.into(),
            paragraphs: Vec::new(),
        }
    }

    pub fn paragraph(&self, id: &str) -> Option<&Paragraph> {
        self.paragraphs.iter().find(|p| p.id == id)
    }

    pub fn paragraph_mut(&mut self, id: &str) -> Option<&mut Paragraph> {
        self.paragraphs.iter_mut().find(|p| p.id == id)
    }

    /// Whether a paragraph already points at `filename`.
    pub fn references_file(&self, filename: &str) -> bool {
        self.paragraphs.iter().any(|p| p.filename == filename)
    }
}

/// Direction for reordering a chapter or paragraph by one slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Up,
    Down,
}

impl MoveDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }

    /// Swap the element at `index` with its neighbour. Returns whether anything moved.
    pub fn apply<T>(&self, items: &mut [T], index: usize) -> bool {
        let target = match self {
            Self::Up if index > 0 => index - 1,
            Self::Down if index + 1 < items.len() => index + 1,
            _ => return false,
        };
        items.swap(index, target);
        true
    }
}
