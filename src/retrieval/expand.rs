use crate::model::Field;

use super::text::{normalize_space, token_set};

const LEGAL_SYNONYMS: &[(&str, &[&str])] = &[
    (
        "termination",
        &[
            "expire",
            "end",
            "cancel",
            "termination for cause",
            "termination for convenience",
        ],
    ),
    (
        "governing",
        &["governing law", "jurisdiction", "venue", "applicable law"],
    ),
    (
        "indemnity",
        &["indemnification", "hold harmless", "defend", "indemnify"],
    ),
    (
        "liability",
        &["limitation of liability", "cap", "damages", "liability cap"],
    ),
    (
        "notice",
        &[
            "notification",
            "written notice",
            "notice period",
            "delivery notice",
        ],
    ),
    (
        "effective",
        &["effective date", "commencement date", "start date"],
    ),
    (
        "parties",
        &["party", "entity", "entities", "company", "counterparty"],
    ),
    (
        "obligation",
        &["shall", "must", "responsibility", "duty", "required to"],
    ),
    (
        "payment",
        &["fees", "amount due", "invoice", "payment terms"],
    ),
];

pub fn expand_field_query(field: &Field) -> String {
    let base = format!(
        "{} {} {}",
        field.name,
        field.prompt,
        field.field_type.as_str()
    );
    let tokens = token_set(&base);

    let mut parts = vec![base.as_str()];
    for (trigger, synonyms) in LEGAL_SYNONYMS {
        if tokens.contains(*trigger) {
            parts.extend(synonyms.iter().copied());
        }
    }

    normalize_space(&parts.join(" "))
}
