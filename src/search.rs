//! `folio search`: retrieval only, no generation.

use anyhow::Result;
use folio_core::models::RetrievalResult;
use tokio_util::sync::CancellationToken;

use crate::session::Services;

/// Characters of chunk text shown per result.
const EXCERPT_CHARS: usize = 240;

pub async fn run_search(services: &Services, query: &str, k: Option<usize>) -> Result<()> {
    let k = k.unwrap_or(services.config().retrieval.k);
    let results = services
        .retriever()
        .retrieve(query, k, &CancellationToken::new())
        .await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for result in &results {
        print_result(result);
    }
    Ok(())
}

fn print_result(result: &RetrievalResult) {
    println!(
        "{}. [{:.2}] {} #{}",
        result.rank, result.score, result.source_name, result.sequence_index
    );
    if let Some(ref language) = result.language {
        println!("    language: {}", language);
    }
    println!("    excerpt: \"{}\"", excerpt(&result.chunk_text));
    println!();
}

/// Whitespace-collapsed prefix of `text`, with an ellipsis when cut.
pub fn excerpt(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= EXCERPT_CHARS {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(EXCERPT_CHARS).collect();
    cut.push('…');
    cut
}
