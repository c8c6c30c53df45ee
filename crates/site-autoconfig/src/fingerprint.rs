//! Site fingerprinting.
//!
//! Combines probe tags, discovered endpoints, the inferred schema and the
//! GraphQL schema into one architecture classification. Known architectures
//! come from a fixed signature table; everything else is classified as
//! generic GraphQL or REST by the strength of the evidence.

use crate::graphql::GraphQLSchemaInfo;
use crate::models::{
    Architecture, CandidateEndpoint, ContentSchema, EndpointKind, FieldRole, Fingerprint, SiteProfile,
};
use tracing::{debug, info};

/// One condition of a known-architecture signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    /// Technology tag reported by the prober
    Tag(&'static str),
    /// A GraphQL endpoint answered
    GraphqlEndpoint,
    /// Introspection succeeded
    Introspection,
    /// Introspection produced a confident series query
    SeriesQuery,
    /// An accepted REST endpoint lives under this path
    RestPath(&'static str),
    /// A REST endpoint returned an entity list
    RestEntityList,
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub name: &'static str,
    pub architecture: Architecture,
    pub criteria: &'static [Criterion],
}

/// Signatures of site stacks seen in the wild, most specific first
pub const KNOWN_SIGNATURES: &[Signature] = &[
    Signature {
        name: "graphql-media-api",
        architecture: Architecture::GraphqlKnown,
        criteria: &[
            Criterion::Tag("graphql"),
            Criterion::GraphqlEndpoint,
            Criterion::Introspection,
            Criterion::SeriesQuery,
        ],
    },
    Signature {
        name: "apollo-graphql",
        architecture: Architecture::GraphqlKnown,
        criteria: &[Criterion::Tag("apollo"), Criterion::GraphqlEndpoint, Criterion::Introspection],
    },
    Signature {
        name: "madara-wp-manga",
        architecture: Architecture::RestKnown,
        criteria: &[
            Criterion::Tag("madara"),
            Criterion::Tag("wordpress"),
            Criterion::RestPath("/wp-json/"),
        ],
    },
    Signature {
        name: "wordpress-rest",
        architecture: Architecture::RestKnown,
        criteria: &[Criterion::Tag("wordpress"), Criterion::RestPath("/wp-json/")],
    },
    Signature {
        name: "nextjs-api-routes",
        architecture: Architecture::RestKnown,
        criteria: &[
            Criterion::Tag("nextjs"),
            Criterion::RestPath("/api/"),
            Criterion::RestEntityList,
        ],
    },
    Signature {
        name: "nuxt-api",
        architecture: Architecture::RestKnown,
        criteria: &[Criterion::Tag("nuxt"), Criterion::RestPath("/api/"), Criterion::RestEntityList],
    },
    Signature {
        name: "laravel-json-api",
        architecture: Architecture::RestKnown,
        criteria: &[
            Criterion::Tag("laravel"),
            Criterion::RestPath("/api/"),
            Criterion::RestEntityList,
        ],
    },
];

/// Fraction of criteria a signature needs before it counts as matched
const SIGNATURE_MATCH_RATIO: f64 = 0.6;

/// Minimum series query confidence for [`Criterion::SeriesQuery`]
const SERIES_QUERY_CONFIDENCE: f64 = 0.5;

/// Evidence the engine classifies
pub struct FingerprintInput<'a> {
    pub profile: &'a SiteProfile,
    pub endpoints: &'a [CandidateEndpoint],
    pub schema: &'a ContentSchema,
    pub graphql: Option<&'a GraphQLSchemaInfo>,
}

impl FingerprintInput<'_> {
    fn satisfies(&self, criterion: Criterion) -> bool {
        match criterion {
            Criterion::Tag(tag) => self.profile.has_tag(tag),
            Criterion::GraphqlEndpoint => self.has_graphql_endpoint(),
            Criterion::Introspection => self.graphql.is_some(),
            Criterion::SeriesQuery => self
                .graphql
                .and_then(|g| g.best_series(None))
                .map(|c| c.confidence >= SERIES_QUERY_CONFIDENCE)
                .unwrap_or(false),
            Criterion::RestPath(path) => self
                .endpoints
                .iter()
                .any(|e| e.kind == EndpointKind::Rest && e.url.contains(path)),
            Criterion::RestEntityList => self
                .endpoints
                .iter()
                .any(|e| e.kind == EndpointKind::Rest && !e.detail && e.entity_score > 0.0),
        }
    }

    fn has_graphql_endpoint(&self) -> bool {
        self.endpoints.iter().any(|e| e.kind == EndpointKind::Graphql)
    }

    /// 0..1 strength of the GraphQL evidence
    fn graphql_strength(&self) -> f64 {
        let mut strength = 0.0;
        if self.has_graphql_endpoint() {
            strength += 0.5;
        }
        if self.graphql.is_some() {
            strength += 0.3;
        }
        if self.profile.has_tag("graphql") {
            strength += 0.2;
        }
        strength
    }

    /// 0..1 strength of the REST evidence
    fn rest_strength(&self) -> f64 {
        let best_score = self
            .endpoints
            .iter()
            .filter(|e| e.kind == EndpointKind::Rest)
            .map(|e| e.entity_score)
            .fold(0.0, f64::max);
        if best_score <= 0.0 {
            return 0.0;
        }
        0.6 * best_score + 0.4 * self.schema.coverage(&FieldRole::REQUIRED)
    }
}

/// Classifies sites against [`KNOWN_SIGNATURES`]
#[derive(Debug, Clone)]
pub struct FingerprintEngine {
    signatures: Vec<Signature>,
}

impl Default for FingerprintEngine {
    fn default() -> Self {
        Self::new(KNOWN_SIGNATURES.to_vec())
    }
}

impl FingerprintEngine {
    pub fn new(signatures: Vec<Signature>) -> Self {
        Self { signatures }
    }

    pub fn analyze(&self, input: &FingerprintInput<'_>) -> Fingerprint {
        let mut matched: Vec<(&Signature, f64)> = Vec::new();
        for signature in &self.signatures {
            let met = signature.criteria.iter().filter(|c| input.satisfies(**c)).count();
            let ratio = met as f64 / signature.criteria.len().max(1) as f64;
            // Tags alone never identify an architecture, nor does structure alone.
            let (tags, structure): (Vec<Criterion>, Vec<Criterion>) = signature
                .criteria
                .iter()
                .copied()
                .partition(|c| matches!(c, Criterion::Tag(_)));
            let structural = structure.iter().any(|c| input.satisfies(*c));
            let tagged = tags.is_empty() || tags.iter().any(|c| input.satisfies(*c));
            debug!(signature = signature.name, ratio, structural, tagged, "Signature checked");
            if ratio >= SIGNATURE_MATCH_RATIO && structural && tagged {
                matched.push((signature, ratio));
            }
        }

        let best = matched
            .iter()
            .copied()
            .fold(None, |best: Option<(&Signature, f64)>, (sig, ratio)| match best {
                Some((_, r)) if r >= ratio => best,
                _ => Some((sig, ratio)),
            });

        let (architecture, confidence) = match best {
            Some((signature, ratio)) => (signature.architecture, ratio),
            None => self.classify_generic(input),
        };

        let fingerprint = Fingerprint {
            architecture,
            confidence,
            matched_signatures: matched.iter().map(|(s, _)| s.name.to_string()).collect(),
            recommendations: recommendations(input, architecture),
        };
        info!(
            architecture = %fingerprint.architecture,
            confidence = fingerprint.confidence,
            signatures = ?fingerprint.matched_signatures,
            "Fingerprint computed"
        );
        fingerprint
    }

    fn classify_generic(&self, input: &FingerprintInput<'_>) -> (Architecture, f64) {
        let graphql = input.graphql_strength();
        let rest = input.rest_strength();

        // An opaque GraphQL endpoint is driven like a REST one: it answered POST queries directly.
        if input.has_graphql_endpoint() && input.graphql.is_none() {
            return (Architecture::RestGeneric, graphql.max(rest));
        }
        if input.graphql.is_some() && graphql >= rest {
            return (Architecture::GraphqlGeneric, graphql);
        }
        if rest > 0.0 {
            return (Architecture::RestGeneric, rest);
        }
        if graphql > 0.0 {
            return (Architecture::GraphqlGeneric, graphql);
        }
        (Architecture::Unknown, 0.0)
    }
}

fn recommendations(input: &FingerprintInput<'_>, architecture: Architecture) -> Vec<String> {
    let mut hints = Vec::new();

    if input.has_graphql_endpoint() && input.graphql.is_none() {
        hints.push("GraphQL introspection disabled, consider writing the search query manually".to_string());
    }
    if input.profile.has_tag("bot-protection") {
        hints.push("Bot protection detected, requests may need browser headers or cookies".to_string());
    }
    if architecture == Architecture::Unknown {
        hints.push("No structured API found, the site may need HTML scraping".to_string());
    }
    if let Some(role) = input.schema.missing_required() {
        if architecture != Architecture::Unknown {
            hints.push(format!("No {} field inferred, review field mappings manually", role));
        }
    }
    if input.schema.child_list().is_none() && !input.schema.is_empty() {
        hints.push("No episode or chapter list found, children operation uses path conventions".to_string());
    }
    hints
}
