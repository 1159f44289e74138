//! Streams an RPSL dump file and splits it into record blocks.

use crate::error::WhoisDbError;
use crate::registry::Registry;
use flate2::read::GzDecoder;
use log::{debug, info};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Record kinds worth keeping. Matched as bare prefixes against the
/// start of the block so that malformed, unterminated attribute names
/// still get through.
const RECORD_KINDS: [&str; 13] = [
    "inetnum",
    "inet6num",
    "route",
    "route6",
    "as-set",
    "mntner",
    "person",
    "role",
    "organisation",
    "irt",
    "aut-num",
    "route-set",
    "domain",
];

/// A raw record block: the bytes between two blank lines, with the
/// synthetic `cust_source:` line already appended.
pub type Block = Vec<u8>;

fn is_record_kind(block: &[u8]) -> bool {
    let head: Vec<u8> = block
        .iter()
        .take(16)
        .map(u8::to_ascii_lowercase)
        .collect();
    RECORD_KINDS
        .iter()
        .any(|kind| head.starts_with(kind.as_bytes()))
}

/// How often to log reading progress, scaled to the file size so big
/// dumps don't flood the log.
fn progress_modulo(filesize: u64) -> usize {
    match filesize {
        0..=8_000_000 => 10_000,
        8_000_001..=99_999_999 => 100_000,
        _ => 1_000_000,
    }
}

/// Read a dump file (gzip-compressed when the name ends in `.gz`) into
/// record blocks, each tagged with its source registry.
///
/// Lines starting with `%`, `#` or `remarks:` are dropped while
/// reading. A whitespace-only line closes the pending block; blocks
/// whose first attribute is not a known record kind are discarded and
/// counted. Returns the kept blocks and the ignored-block count.
pub fn read_blocks(filepath: &Path) -> Result<(Vec<Block>, u64), WhoisDbError> {
    let file = File::open(filepath)?;
    let filesize = file.metadata()?.len();
    let mut reader: Box<dyn BufRead> = if filepath.extension().is_some_and(|ext| ext == "gz") {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let registry = filepath
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(Registry::from_filename);

    let modulo = progress_modulo(filesize);
    let mut single_block: Vec<u8> = Vec::new();
    let mut blocks: Vec<Block> = Vec::new();
    let mut ignored_blocks: u64 = 0;
    let mut line: Vec<u8> = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if line.starts_with(b"%") || line.starts_with(b"#") || line.starts_with(b"remarks:") {
            continue;
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            if is_record_kind(&single_block) {
                if let Some(registry) = registry {
                    single_block.extend_from_slice(format!("cust_source: {registry}\n").as_bytes());
                }
                blocks.push(std::mem::take(&mut single_block));
                if blocks.len() % modulo == 0 {
                    debug!(
                        "read_blocks: another {modulo} blocks, kept {} so far, ignored {ignored_blocks}",
                        blocks.len()
                    );
                }
            } else {
                single_block.clear();
                ignored_blocks += 1;
            }
        } else {
            single_block.extend_from_slice(&line);
        }
    }

    info!(
        "read_blocks: Kept {} blocks + Ignored {ignored_blocks} blocks = Total {} blocks",
        blocks.len(),
        blocks.len() as u64 + ignored_blocks
    );
    Ok((blocks, ignored_blocks))
}
