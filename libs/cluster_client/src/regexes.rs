use once_cell::sync::Lazy;
use regex::Regex;

const UUID_RE_STR: &str = "[0-9a-f-]{32,36}";

pub static UUID_ONLY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(&format!("^{UUID_RE_STR}$")).unwrap());

pub static LEADING_UUID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(&format!(r"^({UUID_RE_STR})\b")).unwrap());

pub static NEW_OLD_UUID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"{UUID_RE_STR}[ ]*\t{UUID_RE_STR}")).unwrap());

pub static IMPORTED_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:Colocated t|T)able being imported: ([^.]*)\.(.*)").unwrap());

pub static STARTED_SNAPSHOT_CREATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s).*Started snapshot creation: (?P<uuid>.*)").unwrap());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_only_matches_plain_uuid() {
        assert!(UUID_ONLY_RE.is_match("0436035d-c4c5-40c6-b45b-19538849b0d9"));
        assert!(!UUID_ONLY_RE.is_match("not a uuid"));
    }

    #[test]
    fn imported_table_matches_plain_and_colocated() {
        let c = IMPORTED_TABLE_RE.captures("Table being imported: myks.mytable").unwrap();
        assert_eq!(&c[1], "myks");
        assert_eq!(&c[2], "mytable");
        let c = IMPORTED_TABLE_RE.captures("Colocated table being imported: myks.mytable").unwrap();
        assert_eq!(&c[1], "myks");
    }
}
