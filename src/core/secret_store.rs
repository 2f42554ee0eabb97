//! Purpose: Flat-file store for one-time secrets that vanish on first read.
//! Exports: `SecretStore`, `sanitize_key`, `generate_key`, `MAX_KEY_CHARS`, `GENERATED_KEY_BYTES`.
//! Role: Storage behind the share server; one `<key>.txt` file per secret.
//! Invariants: A key never escapes the store directory (only its last path component is used).
//! Invariants: `put` never overwrites; `take` hands a secret to at most one caller.
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use getrandom::fill as fill_random;

use super::error::{Error, ErrorKind, io_error};

pub const MAX_KEY_CHARS: usize = 32;
pub const GENERATED_KEY_BYTES: usize = 8;

const SECRET_EXTENSION: &str = "txt";
const CLAIM_NONCE_BYTES: usize = 8;

#[derive(Clone, Debug)]
pub struct SecretStore {
    dir: PathBuf,
}

impl SecretStore {
    /// Open the store, creating its directory when missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|err| io_error(err, "failed to create secret store directory", &dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn secret_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{SECRET_EXTENSION}"))
    }

    /// Store `text` and return its key.
    ///
    /// An empty or missing `requested` key gets a random one; otherwise the first
    /// `MAX_KEY_CHARS` characters are used, reduced to their last path component.
    pub fn put(&self, requested: Option<&str>, text: &str) -> Result<String, Error> {
        let key = match requested {
            Some(requested) if !requested.is_empty() => {
                let truncated: String = requested.chars().take(MAX_KEY_CHARS).collect();
                sanitize_key(&truncated)?
            }
            _ => generate_key()?,
        };
        let path = self.secret_path(&key);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|err| {
                if err.kind() == io::ErrorKind::AlreadyExists {
                    Error::new(ErrorKind::AlreadyExists)
                        .with_message("secret key is already in use")
                        .with_key(key.clone())
                        .with_hint("Pick another code or leave it empty for a random one.")
                } else {
                    io_error(err, "failed to store secret", &path)
                }
            })?;
        file.write_all(text.as_bytes())
            .map_err(|err| io_error(err, "failed to store secret", &path))?;
        Ok(key)
    }

    /// Read and delete the secret for `code`; `None` when there is none.
    pub fn take(&self, code: &str) -> Result<Option<String>, Error> {
        let key = sanitize_key(code)?;
        let path = self.secret_path(&key);
        // Renaming first means concurrent readers cannot both get the text.
        let claimed = self
            .dir
            .join(format!("{key}.{SECRET_EXTENSION}.claim-{}", random_hex(CLAIM_NONCE_BYTES)?));
        match fs::rename(&path, &claimed) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(err, "failed to claim secret", &path)),
        }
        let text = fs::read(&claimed).map_err(|err| io_error(err, "failed to read secret", &path));
        fs::remove_file(&claimed)
            .map_err(|err| io_error(err, "failed to delete secret", &path))?;
        let text = String::from_utf8(text?).map_err(|err| {
            Error::new(ErrorKind::Malformed)
                .with_message("stored secret is not valid UTF-8")
                .with_key(key.clone())
                .with_source(err)
        })?;
        Ok(Some(text))
    }
}

/// Last path component of `code`; rejects codes with none (`""`, `/`, `.`, `..`).
pub fn sanitize_key(code: &str) -> Result<String, Error> {
    Path::new(code)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message("secret code has no usable name")
                .with_hint("Use letters and digits only.")
        })
}

pub fn generate_key() -> Result<String, Error> {
    random_hex(GENERATED_KEY_BYTES)
}

fn random_hex(len: usize) -> Result<String, Error> {
    let mut bytes = vec![0u8; len];
    fill_random(&mut bytes).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message(format!("failed to generate random key: {err}"))
    })?;
    Ok(hex_encode(&bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(nibble_hex(byte >> 4));
        out.push(nibble_hex(byte & 0x0f));
    }
    out
}

fn nibble_hex(nibble: u8) -> char {
    match nibble {
        0..=9 => char::from(b'0' + nibble),
        _ => char::from(b'a' + (nibble - 10)),
    }
}

#[cfg(test)]
mod tests {
    use super::{GENERATED_KEY_BYTES, SecretStore, generate_key, hex_encode, sanitize_key};
    use crate::core::error::ErrorKind;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn secret_is_readable_exactly_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SecretStore::open(temp.path().join("pwshare")).expect("open");

        let key = store.put(Some("abc123"), "sulya<br>ksdfae").expect("put");
        assert_eq!(key, "abc123");
        assert!(store.dir().join("abc123.txt").is_file());

        assert_eq!(
            store.take("abc123").expect("take").as_deref(),
            Some("sulya<br>ksdfae")
        );
        assert_eq!(store.take("abc123").expect("take again"), None);
        assert_eq!(std::fs::read_dir(store.dir()).expect("list").count(), 0);
    }

    #[test]
    fn concurrent_takes_have_one_winner() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SecretStore::open(temp.path()).expect("open");

        for round in 0..20 {
            let key = store.put(Some(&format!("race{round}")), "only once").expect("put");
            let barrier = Barrier::new(8);
            let winners: Vec<String> = thread::scope(|scope| {
                let handles: Vec<_> = (0..8)
                    .map(|_| {
                        scope.spawn(|| {
                            barrier.wait();
                            store.take(&key).expect("take")
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .filter_map(|handle| handle.join().expect("join"))
                    .collect()
            });
            assert_eq!(winners, ["only once"]);
        }
        assert_eq!(std::fs::read_dir(store.dir()).expect("list").count(), 0);
    }

    #[test]
    fn empty_code_gets_random_hex_key() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SecretStore::open(temp.path()).expect("open");
        let first = store.put(Some(""), "one").expect("put");
        let second = store.put(None, "two").expect("put");
        assert_eq!(first.len(), GENERATED_KEY_BYTES * 2);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
        assert_eq!(generate_key().expect("key").len(), 16);
    }

    #[test]
    fn long_codes_are_truncated() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SecretStore::open(temp.path()).expect("open");
        let code = "Ahshai9Ia4ohPh0cadak8aekueth8ierEXTRA";
        let key = store.put(Some(code), "x").expect("put");
        assert_eq!(key, "Ahshai9Ia4ohPh0cadak8aekueth8ier");
    }

    #[test]
    fn existing_key_is_not_overwritten() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SecretStore::open(temp.path()).expect("open");
        store.put(Some("dup"), "first").expect("put");
        let err = store.put(Some("dup"), "second").expect_err("dup");
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(store.take("dup").expect("take").as_deref(), Some("first"));
    }

    #[test]
    fn keys_cannot_escape_the_store() {
        assert_eq!(sanitize_key("../../etc/passwd").expect("key"), "passwd");
        assert_eq!(sanitize_key("dir/name").expect("key"), "name");
        for bad in ["", "/", "..", "."] {
            let err = sanitize_key(bad).expect_err("bad key");
            assert_eq!(err.kind(), ErrorKind::Usage);
        }

        let temp = tempfile::tempdir().expect("tempdir");
        let store = SecretStore::open(temp.path().join("store")).expect("open");
        let key = store.put(Some("../outside"), "x").expect("put");
        assert_eq!(key, "outside");
        assert!(store.dir().join("outside.txt").is_file());
        assert!(!temp.path().join("outside.txt").exists());
    }

    #[test]
    fn hex_encoding_is_lowercase() {
        assert_eq!(hex_encode(&[0x00, 0xab, 0x7f]), "00ab7f");
    }
}
