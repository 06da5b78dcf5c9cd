//! Fixed classification prompts and reply parsing.

use std::fmt;

use crate::types::ChatMessage;

/// Which classification question to ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    /// Three-way document type: review, supporting information, main paper.
    DocumentType,
    /// Whether numbered attachment excerpts are copies of the same work.
    DuplicateCheck,
}

/// A recognised classification answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    /// Review article.
    Review,
    /// Supporting-information document.
    SupportingInformation,
    /// Original research article.
    MainPaper,
    /// The excerpts are copies of the same work.
    Duplicate,
    /// The excerpts are different documents.
    Distinct,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Review => "review",
            Self::SupportingInformation => "supporting-information",
            Self::MainPaper => "main-paper",
            Self::Duplicate => "duplicate",
            Self::Distinct => "distinct",
        };
        f.write_str(s)
    }
}

/// Parsed reply of a classification call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The reply named exactly one label valid for the prompt.
    Label(Label),
    /// The reply could not be interpreted; the raw text is kept.
    Unparseable(String),
}

const DOCUMENT_TYPE_SYSTEM: &str = "You classify scientific documents from the first pages of their text. \
Answer with exactly one word: REVIEW if the document is a review article that surveys prior work, \
SI if it is supporting or supplementary information accompanying another article, \
MAIN if it is an original research article. Do not explain.";

const DUPLICATE_CHECK_SYSTEM: &str = "You compare excerpts of files attached to one bibliographic record. \
Answer YES if at least two of the numbered excerpts are copies or versions of the same document, \
otherwise answer NO. Answer with exactly one word. Do not explain.";

impl PromptKind {
    /// Builds the message list for this prompt over `text`.
    #[must_use]
    pub fn messages(self, text: &str) -> Vec<ChatMessage> {
        let system = match self {
            Self::DocumentType => DOCUMENT_TYPE_SYSTEM,
            Self::DuplicateCheck => DUPLICATE_CHECK_SYSTEM,
        };
        vec![ChatMessage::system(system), ChatMessage::user(text)]
    }

    /// Interprets a reply to this prompt.
    ///
    /// Matching is case-insensitive over the words of the reply. A reply that
    /// names no label, or more than one, is [`Verdict::Unparseable`].
    #[must_use]
    pub fn parse_reply(self, reply: &str) -> Verdict {
        let mut found: Option<Label> = None;
        for word in reply
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let Some(label) = self.word_label(&word.to_uppercase()) else {
                continue;
            };
            match found {
                None => found = Some(label),
                Some(prev) if prev == label => {}
                Some(_) => return Verdict::Unparseable(reply.to_string()),
            }
        }
        found.map_or_else(|| Verdict::Unparseable(reply.to_string()), Verdict::Label)
    }

    fn word_label(self, word: &str) -> Option<Label> {
        match self {
            Self::DocumentType => match word {
                "REVIEW" => Some(Label::Review),
                "SI" | "SUPPORTING" | "SUPPLEMENTARY" | "SUPPLEMENT" => {
                    Some(Label::SupportingInformation)
                }
                "MAIN" | "RESEARCH" => Some(Label::MainPaper),
                _ => None,
            },
            Self::DuplicateCheck => match word {
                "YES" | "DUPLICATE" | "DUPLICATES" => Some(Label::Duplicate),
                "NO" | "DISTINCT" => Some(Label::Distinct),
                _ => None,
            },
        }
    }
}

/// Joins attachment excerpts into the numbered layout the duplicate prompt expects.
#[must_use]
pub fn format_excerpts<S: AsRef<str>>(excerpts: &[S]) -> String {
    excerpts
        .iter()
        .enumerate()
        .map(|(i, text)| format!("[Attachment {}]\n{}", i + 1, text.as_ref().trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
