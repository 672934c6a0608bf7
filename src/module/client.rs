//! Client copy of compiled output.
//!
//! Server data-fetching exports never run in the browser; the client copy
//! drops each `export [async] function <name>` declaration together with its
//! body.

/// Remove the exported function declarations named in `names`.
pub fn strip_server_exports(code: &[u8], names: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(code.len());
    let mut pos = 0;

    while pos < code.len() {
        match find_declaration(code, pos, names) {
            Some((start, end)) => {
                out.extend_from_slice(&code[pos..start]);
                pos = end;
            }
            None => {
                out.extend_from_slice(&code[pos..]);
                break;
            }
        }
    }

    out
}

/// Locate the next server export declaration at or after `from`.
fn find_declaration(code: &[u8], from: usize, names: &[&str]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    for name in names {
        for prefix in ["export async function ", "export function "] {
            let needle = format!("{prefix}{name}");
            let Some(rel) = find(&code[from..], needle.as_bytes()) else {
                continue;
            };
            let start = from + rel;
            // Reject longer identifiers (`getServerPropsX`)
            let after = start + needle.len();
            if code
                .get(after)
                .is_some_and(|c| c.is_ascii_alphanumeric() || *c == b'_' || *c == b'$')
            {
                continue;
            }
            let Some(end) = body_end(code, after) else {
                continue;
            };
            if best.is_none_or(|(s, _)| start < s) {
                best = Some((start, end));
            }
        }
    }
    best
}

/// End of the brace-delimited body starting after `from`, including one
/// trailing newline.
fn body_end(code: &[u8], from: usize) -> Option<usize> {
    let open = from + code[from..].iter().position(|c| *c == b'{')?;
    let mut depth = 0usize;
    for (i, c) in code[open..].iter().enumerate() {
        match c {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let mut end = open + i + 1;
                    if code.get(end) == Some(&b'\n') {
                        end += 1;
                    }
                    return Some(end);
                }
            }
            _ => {}
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
