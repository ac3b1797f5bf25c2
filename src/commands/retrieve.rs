use std::io::{self, Write};

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use fieldcite::config::RuntimeSettings;
use fieldcite::extraction::Orchestrator;
use fieldcite::model::{Candidate, DocumentArtifact, Evidence, Field, QualityProfile};
use fieldcite::retrieval::text::{normalize_space, truncate_chars};
use fieldcite::util::read_json;

use super::write_json_stdout;
use crate::cli::RetrieveArgs;

const PREVIEW_CHARS: usize = 160;

#[derive(Debug, Serialize)]
struct RetrieveResponse<'a> {
    field: &'a Field,
    doc_version_id: &'a str,
    top_k: usize,
    candidates: &'a [Candidate],
    evidence: &'a [Evidence],
}

pub fn run(args: RetrieveArgs) -> Result<()> {
    let artifact: DocumentArtifact = read_json(&args.artifact)?;
    let field = args.field.to_field();
    let profile = QualityProfile::from(args.profile);
    let top_k = args.top_k.unwrap_or_else(|| profile.top_k()).max(1);

    let orchestrator = Orchestrator::new(RuntimeSettings::from_env());
    let retrieved = orchestrator.retrieve(&field, &artifact, None, top_k);

    info!(
        field_key = %field.key,
        doc_version_id = %artifact.doc_version_id,
        top_k,
        candidates = retrieved.candidates.len(),
        evidence = retrieved.evidence.len(),
        "retrieval completed"
    );

    if args.json {
        write_json_stdout(&RetrieveResponse {
            field: &field,
            doc_version_id: &artifact.doc_version_id,
            top_k,
            candidates: &retrieved.candidates,
            evidence: &retrieved.evidence,
        })
    } else {
        write_text_response(&field, &retrieved.evidence)
    }
}

fn write_text_response(field: &Field, evidence: &[Evidence]) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Field: {} ({})", field.name, field.key)?;
    writeln!(output, "Evidence: {}", evidence.len())?;

    for (index, item) in evidence.iter().enumerate() {
        writeln!(
            output,
            "{}.\t{}\t{}\tscore={:.3}\tpages {}",
            index + 1,
            item.block_id(),
            item.block_type().as_str(),
            item.final_score(),
            format_pages(item.citations().iter().filter_map(|citation| citation.page))
        )?;
        let text = normalize_space(item.text());
        writeln!(output, "\t{}", truncate_chars(&text, PREVIEW_CHARS))?;
    }

    output.flush()?;
    Ok(())
}

fn format_pages(pages: impl Iterator<Item = u32>) -> String {
    let mut pages = pages.collect::<Vec<_>>();
    pages.sort_unstable();
    pages.dedup();
    match (pages.first(), pages.last()) {
        (Some(first), Some(last)) if first == last => first.to_string(),
        (Some(first), Some(last)) => format!("{first}-{last}"),
        _ => "n/a".to_string(),
    }
}
