/// What the watch loop decided to do with a fired specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    /// Classify by existence of the backing file and presence in the graph.
    pub(crate) fn classify(exists: bool, tracked: bool) -> Option<Self> {
        match (exists, tracked) {
            (true, true) => Some(Self::Modified),
            (true, false) => Some(Self::Added),
            (false, true) => Some(Self::Removed),
            (false, false) => None,
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Added => "add",
            Self::Modified => "modify",
            Self::Removed => "remove",
        }
    }
}
