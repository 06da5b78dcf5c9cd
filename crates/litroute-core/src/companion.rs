//! Publisher-keyed lookup of supporting-information files.
//!
//! Only a few publishers expose supporting information in a predictable
//! place; every other publisher yields no candidates. Lookups are best-effort
//! and the engine ignores their failures.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::error::ExternalError;
use crate::library::{CompanionCandidate, CompanionFinder, ExternalResult};
use crate::model::LibraryItem;

#[allow(clippy::expect_used)]
static PII: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)pii[/=](S[\dX]{16,20})").expect("valid PII pattern"));

#[allow(clippy::expect_used)]
static RSC_SUPPDATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)href="(https://www\.rsc\.org/suppdata/[^"]+\.(?:pdf|docx))""#)
        .expect("valid suppdata pattern")
});

#[allow(clippy::expect_used)]
static RSC_ARTICLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z])(\d)([a-z]+)\d+[a-z]?").expect("valid article id pattern")
});

/// Characters of a landing page searched for the PII.
const PII_WINDOW: usize = 3000;

const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "docx", "doc"];

/// Publisher implied by a DOI prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Publisher {
    /// American Chemical Society (`10.1021`).
    Acs,
    /// Royal Society of Chemistry (`10.1039`).
    Rsc,
    /// Elsevier (`10.1016`).
    Elsevier,
    /// Wiley (`10.1002`).
    Wiley,
    /// Nature Portfolio (`10.1038`).
    Nature,
    /// Science / AAAS (`10.1126`).
    Science,
    /// The Electrochemical Society (`10.1149`).
    Ecs,
    /// American Physical Society (`10.1103`).
    Aps,
    /// AIP Publishing (`10.1063`).
    Aip,
    /// Anything else.
    Other,
}

impl Publisher {
    /// Publisher of `doi`.
    #[must_use]
    pub fn from_doi(doi: &str) -> Self {
        let prefix = doi.trim().split('/').next().unwrap_or_default();
        match prefix {
            "10.1021" => Self::Acs,
            "10.1039" => Self::Rsc,
            "10.1016" => Self::Elsevier,
            "10.1002" => Self::Wiley,
            "10.1038" => Self::Nature,
            "10.1126" => Self::Science,
            "10.1149" => Self::Ecs,
            "10.1103" => Self::Aps,
            "10.1063" => Self::Aip,
            _ => Self::Other,
        }
    }

    /// Short name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Acs => "ACS",
            Self::Rsc => "RSC",
            Self::Elsevier => "Elsevier",
            Self::Wiley => "Wiley",
            Self::Nature => "Nature",
            Self::Science => "Science",
            Self::Ecs => "ECS",
            Self::Aps => "APS",
            Self::Aip => "AIP",
            Self::Other => "Other",
        }
    }
}

/// Base URLs of the lookup services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionEndpoints {
    /// Figshare widget file listing (ACS).
    pub figshare: String,
    /// DOI resolver; the DOI is appended.
    pub doi_resolver: String,
    /// Elsevier supplement CDN; `1-s2.0-<pii>-mmc1.<ext>` is appended.
    pub elsevier_cdn: String,
    /// RSC supplementary data root.
    pub rsc_suppdata: String,
}

impl Default for CompanionEndpoints {
    fn default() -> Self {
        Self {
            figshare: "https://widgets.figshare.com/public/files".into(),
            doi_resolver: "https://doi.org/".into(),
            elsevier_cdn: "https://ars.els-cdn.com/content/image/".into(),
            rsc_suppdata: "https://www.rsc.org/suppdata/".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FigshareListing {
    #[serde(default)]
    files: Vec<FigshareFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FigshareFile {
    name: String,
    download_url: String,
}

fn allowed_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// [`CompanionFinder`] over the publishers' public endpoints.
#[derive(Debug, Clone)]
pub struct HttpCompanionFinder {
    http: reqwest::Client,
    endpoints: CompanionEndpoints,
}

impl HttpCompanionFinder {
    /// Creates a finder with the public endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("litroute/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ExternalError::from)?;
        Ok(Self {
            http,
            endpoints: CompanionEndpoints::default(),
        })
    }

    /// Replaces the service endpoints.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: CompanionEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    async fn acs(&self, doi: &str) -> ExternalResult<Vec<CompanionCandidate>> {
        let listing: FigshareListing = self
            .http
            .get(&self.endpoints.figshare)
            .query(&[
                ("institution", "acs"),
                ("limit", "21"),
                ("offset", "0"),
                ("collectionResourceDOI", doi),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut seen = HashSet::new();
        Ok(listing
            .files
            .into_iter()
            .filter(|f| allowed_extension(&f.name) && seen.insert(f.name.clone()))
            .map(|f| CompanionCandidate {
                name: f.name,
                url: f.download_url,
            })
            .collect())
    }

    /// Final URL and body of the DOI landing page.
    async fn landing_page(&self, doi: &str) -> ExternalResult<(String, String)> {
        let response = self
            .http
            .get(format!("{}{doi}", self.endpoints.doi_resolver))
            .send()
            .await?
            .error_for_status()?;
        let url = response.url().to_string();
        Ok((url, response.text().await?))
    }

    async fn elsevier(&self, doi: &str) -> ExternalResult<Vec<CompanionCandidate>> {
        let (url, body) = self.landing_page(doi).await?;
        let window: String = body.chars().take(PII_WINDOW).collect();
        let haystack = format!("{url} {window}");
        let Some(pii) = PII.captures(&haystack).map(|c| c[1].to_string()) else {
            debug!(doi, "No PII on landing page");
            return Ok(Vec::new());
        };

        let mut found = Vec::new();
        for ext in ["pdf", "docx"] {
            let url = format!("{}1-s2.0-{pii}-mmc1.{ext}", self.endpoints.elsevier_cdn);
            let exists = self
                .http
                .head(&url)
                .send()
                .await
                .is_ok_and(|r| r.status().is_success());
            trace!(%url, exists, "Checked supplement");
            if exists {
                found.push(CompanionCandidate {
                    name: format!("mmc1.{ext}"),
                    url,
                });
            }
        }
        Ok(found)
    }

    async fn rsc(&self, doi: &str) -> ExternalResult<Vec<CompanionCandidate>> {
        let lower = doi.to_lowercase();
        let Some(article) = lower.strip_prefix("10.1039/").filter(|a| !a.is_empty()) else {
            return Ok(Vec::new());
        };

        let (_, body) = self.landing_page(doi).await?;
        let mut seen = HashSet::new();
        let linked: Vec<CompanionCandidate> = RSC_SUPPDATA
            .captures_iter(&body)
            .map(|c| c[1].to_string())
            .filter(|url| seen.insert(url.clone()))
            .map(|url| CompanionCandidate {
                name: url.rsplit('/').next().unwrap_or_default().to_string(),
                url,
            })
            .collect();
        if !linked.is_empty() {
            return Ok(linked);
        }

        let Some(parts) = RSC_ARTICLE.captures(article) else {
            return Ok(Vec::new());
        };
        let year = format!("{}{}", &parts[1], &parts[2]);
        let journal = &parts[3];
        Ok((1..=2)
            .map(|n| CompanionCandidate {
                name: format!("{article}_si{n}.pdf"),
                url: format!(
                    "{}{journal}/{year}/{article}/{article}{n}.pdf",
                    self.endpoints.rsc_suppdata
                ),
            })
            .collect())
    }
}

#[async_trait]
impl CompanionFinder for HttpCompanionFinder {
    async fn find_companion(&self, item: &LibraryItem) -> ExternalResult<Vec<CompanionCandidate>> {
        let Some(doi) = item.doi.as_deref().map(str::trim).filter(|d| !d.is_empty()) else {
            return Ok(Vec::new());
        };
        let publisher = Publisher::from_doi(doi);
        let found = match publisher {
            Publisher::Acs => self.acs(doi).await?,
            Publisher::Elsevier => self.elsevier(doi).await?,
            Publisher::Rsc => self.rsc(doi).await?,
            _ => Vec::new(),
        };
        debug!(item = %item.key, publisher = publisher.as_str(), found = found.len(), "Companion lookup");
        Ok(found)
    }
}
