//! Item classification.
//!
//! Local state decides the cheap branches (tag, document count); the
//! content classifier is only consulted for items that have documents.
//! Anything the classifier cannot answer falls back to `MainPaper`, so a bad
//! reply never holds up routing.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::duplicate::pairwise_duplicate_likelihood;
use crate::library::{ContentClassifier, ContentExtractor, ExtractLimits, PromptKind, Verdict};
use crate::model::{Attachment, ClassificationOutcome, LibraryItem};
use crate::retry::{RetryError, RetryPolicy};

/// Maps an item to a [`ClassificationOutcome`].
pub struct Classifier {
    extractor: Arc<dyn ContentExtractor>,
    model: Arc<dyn ContentClassifier>,
    analysis_tag: String,
    limits: ExtractLimits,
    retry: RetryPolicy,
}

impl Classifier {
    /// Creates a classifier for items tagged `analysis_tag`.
    pub fn new(
        extractor: Arc<dyn ContentExtractor>,
        model: Arc<dyn ContentClassifier>,
        analysis_tag: impl Into<String>,
        limits: ExtractLimits,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            extractor,
            model,
            analysis_tag: analysis_tag.into(),
            limits,
            retry,
        }
    }

    /// Tag that marks items for analysis.
    #[must_use]
    pub fn analysis_tag(&self) -> &str {
        &self.analysis_tag
    }

    /// Whether `item` carries the analysis tag.
    #[must_use]
    pub fn is_tagged(&self, item: &LibraryItem) -> bool {
        item.has_tag(&self.analysis_tag)
    }

    /// Classifies one item. Children must already be loaded.
    ///
    /// # Errors
    ///
    /// Only a classifier call that kept failing transiently is an error;
    /// every other failure resolves to a fallback outcome.
    pub async fn classify(&self, item: &LibraryItem) -> Result<ClassificationOutcome, RetryError> {
        if !self.is_tagged(item) {
            return Ok(ClassificationOutcome::NoAnalysisTag);
        }

        let documents: Vec<&Attachment> = item.documents().collect();
        let outcome = match documents.as_slice() {
            [] => ClassificationOutcome::NoAttachment,
            [single] => {
                let text = self.extract(single).await;
                self.document_type(&item.key, &text).await?
            }
            several => self.compare(&item.key, several).await?,
        };
        debug!(item = %item.key, documents = documents.len(), %outcome, "Classified");
        Ok(outcome)
    }

    /// Bounded text of an attachment; empty on any failure.
    async fn extract(&self, attachment: &Attachment) -> String {
        let (extractor, limits) = (self.extractor.as_ref(), self.limits);
        match self
            .retry
            .run("extract_text", move || extractor.extract_text(attachment, limits))
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(attachment = %attachment.key, error = %e, "Text extraction failed");
                String::new()
            }
        }
    }

    async fn document_type(
        &self,
        key: &str,
        text: &str,
    ) -> Result<ClassificationOutcome, RetryError> {
        if text.is_empty() {
            debug!(item = %key, "No text to classify, assuming main paper");
            return Ok(ClassificationOutcome::MainPaper);
        }

        let model = self.model.as_ref();
        let verdict = self
            .retry
            .run("classify_document", move || {
                model.classify(PromptKind::DocumentType, text)
            })
            .await;

        let label = match verdict {
            Ok(Verdict::Label(label)) => label,
            Ok(Verdict::Unparseable(raw)) => {
                warn!(item = %key, reply = %raw, "Unparseable document type, assuming main paper");
                return Ok(ClassificationOutcome::MainPaper);
            }
            Err(RetryError::Permanent(e)) => {
                warn!(item = %key, error = %e, "Document type call failed, assuming main paper");
                return Ok(ClassificationOutcome::MainPaper);
            }
            Err(e) => return Err(e),
        };

        Ok(match label {
            litroute_llm::Label::Review => ClassificationOutcome::Review,
            litroute_llm::Label::SupportingInformation => {
                ClassificationOutcome::SupportingInformation
            }
            litroute_llm::Label::MainPaper
            | litroute_llm::Label::Duplicate
            | litroute_llm::Label::Distinct => ClassificationOutcome::MainPaper,
        })
    }

    async fn compare(
        &self,
        key: &str,
        documents: &[&Attachment],
    ) -> Result<ClassificationOutcome, RetryError> {
        let mut texts = Vec::with_capacity(documents.len());
        for attachment in documents {
            let text = self.extract(attachment).await;
            if !text.is_empty() {
                texts.push(text);
            }
        }
        if texts.len() < 2 {
            debug!(item = %key, readable = texts.len(), "Too little text to compare attachments");
            return Ok(ClassificationOutcome::Unclassifiable);
        }

        let duplicate = pairwise_duplicate_likelihood(self.model.as_ref(), &self.retry, &texts).await?;
        Ok(if duplicate {
            ClassificationOutcome::MultiAttachmentDuplicate
        } else {
            ClassificationOutcome::MultiAttachmentNoDuplicate
        })
    }
}
