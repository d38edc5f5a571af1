use std::sync::LazyLock;

use regex::Regex;

use breadbox_core::{InodeKind, MAX_FILENAME, MAX_FILE_BLOCKS, MAX_PATHNAME, MAX_USERNAME};

// Anchored, single spaces, nothing trailing. The block number alternation
// bans leading zeros without banning plain 0.
static READ_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^FS_READBLOCK ([^ ]+) (/[^ ]+) ([1-9][0-9]*|0)$").unwrap());
static WRITE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^FS_WRITEBLOCK ([^ ]+) (/[^ ]+) ([1-9][0-9]*|0)$").unwrap());
static CREATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^FS_CREATE ([^ ]+) (/[^ ]+) ([fd])$").unwrap());
static DELETE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^FS_DELETE ([^ ]+) (/[^ ]+)$").unwrap());

/// A request that survived the grammar and the length limits. The raw
/// header is kept by the caller for the echo reply.
#[derive(Debug, PartialEq, Eq)]
pub enum Request {
    ReadBlock {
        user: String,
        path: Vec<String>,
        block: u32,
    },
    WriteBlock {
        user: String,
        path: Vec<String>,
        block: u32,
    },
    Create {
        user: String,
        path: Vec<String>,
        kind: InodeKind,
    },
    Delete {
        user: String,
        path: Vec<String>,
    },
}

pub fn parse_request(header: &str) -> Option<Request> {
    if let Some(caps) = READ_RE.captures(header) {
        let (user, path) = user_and_path(&caps)?;
        let block = block_number(&caps)?;
        return Some(Request::ReadBlock { user, path, block });
    }
    if let Some(caps) = WRITE_RE.captures(header) {
        let (user, path) = user_and_path(&caps)?;
        let block = block_number(&caps)?;
        return Some(Request::WriteBlock { user, path, block });
    }
    if let Some(caps) = CREATE_RE.captures(header) {
        let (user, path) = user_and_path(&caps)?;
        let kind = match &caps[3] {
            "f" => InodeKind::File,
            _ => InodeKind::Directory,
        };
        return Some(Request::Create { user, path, kind });
    }
    if let Some(caps) = DELETE_RE.captures(header) {
        let (user, path) = user_and_path(&caps)?;
        return Some(Request::Delete { user, path });
    }

    None
}

fn user_and_path(caps: &regex::Captures) -> Option<(String, Vec<String>)> {
    let user = &caps[1];
    if user.is_empty() || user.len() > MAX_USERNAME || has_whitespace(user) {
        return None;
    }

    let pathname = &caps[2];
    if has_whitespace(pathname) {
        return None;
    }
    let path = split_path(pathname)?;

    Some((user.to_owned(), path))
}

fn block_number(caps: &regex::Captures) -> Option<u32> {
    let block: u32 = caps[3].parse().ok()?;
    (block < MAX_FILE_BLOCKS as u32).then_some(block)
}

/// Split `/a/b/c` into components. A path must start with `/`, must not end
/// with one, and every component must be non-empty and short enough. A bare
/// `/` has no components and is refused, so no request can ever name the
/// root inode itself.
fn split_path(pathname: &str) -> Option<Vec<String>> {
    if !pathname.starts_with('/') || pathname.len() > MAX_PATHNAME {
        return None;
    }
    if pathname.len() > 1 && pathname.ends_with('/') {
        return None;
    }

    let mut components = Vec::new();
    for component in pathname[1..].split('/') {
        if component.is_empty() || component.len() > MAX_FILENAME {
            return None;
        }
        components.push(component.to_owned());
    }

    (!components.is_empty()).then_some(components)
}

// The regexes only rule out ' '; tabs and friends still count.
fn has_whitespace(s: &str) -> bool {
    s.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(components: &[&str]) -> Vec<String> {
        components.iter().map(|c| (*c).to_owned()).collect()
    }

    #[test]
    fn parses_every_verb() {
        assert_eq!(
            parse_request("FS_READBLOCK alice /a/b 0"),
            Some(Request::ReadBlock {
                user: "alice".into(),
                path: path(&["a", "b"]),
                block: 0
            })
        );
        assert_eq!(
            parse_request("FS_WRITEBLOCK alice /a 17"),
            Some(Request::WriteBlock {
                user: "alice".into(),
                path: path(&["a"]),
                block: 17
            })
        );
        assert_eq!(
            parse_request("FS_CREATE bob /dir d"),
            Some(Request::Create {
                user: "bob".into(),
                path: path(&["dir"]),
                kind: InodeKind::Directory
            })
        );
        assert_eq!(
            parse_request("FS_DELETE bob /dir"),
            Some(Request::Delete {
                user: "bob".into(),
                path: path(&["dir"])
            })
        );
    }

    #[test]
    fn rejects_malformed_framing() {
        for header in [
            "",
            "FS_READBLOCK",
            "FS_READBLOCK alice",
            "FS_READBLOCK alice /a",
            "FS_READBLOCK alice /a 0 ",
            " FS_READBLOCK alice /a 0",
            "FS_READBLOCK  alice /a 0",
            "FS_READBLOCK alice /a 0 extra",
            "FS_TRUNCATE alice /a 0",
            "fs_readblock alice /a 0",
        ] {
            assert_eq!(parse_request(header), None, "accepted {header:?}");
        }
    }

    #[test]
    fn rejects_bad_block_numbers() {
        assert!(parse_request("FS_READBLOCK alice /a 00").is_none());
        assert!(parse_request("FS_READBLOCK alice /a 01").is_none());
        assert!(parse_request("FS_READBLOCK alice /a -1").is_none());
        assert!(parse_request("FS_READBLOCK alice /a 124").is_none());
        assert!(parse_request("FS_READBLOCK alice /a 99999999999999999999").is_none());
        assert!(parse_request("FS_READBLOCK alice /a 123").is_some());
    }

    #[test]
    fn rejects_bad_paths() {
        assert!(parse_request("FS_DELETE alice a").is_none());
        assert!(parse_request("FS_DELETE alice /").is_none());
        assert!(parse_request("FS_DELETE alice /a/").is_none());
        assert!(parse_request("FS_DELETE alice //a").is_none());
        assert!(parse_request("FS_DELETE alice /a//b").is_none());

        let long_component = format!("/{}", "x".repeat(MAX_FILENAME + 1));
        assert!(parse_request(&format!("FS_DELETE alice {long_component}")).is_none());

        let long_path = format!("/{}", "a/".repeat(MAX_PATHNAME).trim_end_matches('/'));
        assert!(parse_request(&format!("FS_DELETE alice {long_path}")).is_none());

        let just_fits = format!("/{}", "x".repeat(MAX_FILENAME));
        assert!(parse_request(&format!("FS_DELETE alice {just_fits}")).is_some());
    }

    #[test]
    fn rejects_bad_usernames() {
        assert!(parse_request("FS_DELETE aliceandbob /a").is_none());
        assert!(parse_request("FS_DELETE ali\tce /a").is_none());
        assert!(parse_request("FS_DELETE ab\u{a0}cd /a").is_none());

        let just_fits = "u".repeat(MAX_USERNAME);
        assert!(parse_request(&format!("FS_DELETE {just_fits} /a")).is_some());
    }

    #[test]
    fn rejects_whitespace_smuggled_into_paths() {
        assert!(parse_request("FS_DELETE alice /a\tb").is_none());
        assert!(parse_request("FS_CREATE alice /a\u{2009}b f").is_none());
    }
}
