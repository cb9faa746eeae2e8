//! Pre-upload file validation and error message templating

use crate::config::{MessagesConfig, ValidationConfig};
use serde::Serialize;

/// What validation callbacks see of a candidate file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    pub name: String,
    pub size: u64,
}

/// Why a file was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Extension,
    Empty,
    TooLarge,
    TooSmall,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::Extension => "type_error",
            Rejection::Empty => "empty_error",
            Rejection::TooLarge => "size_error",
            Rejection::TooSmall => "min_size_error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Validator {
    rules: ValidationConfig,
    messages: MessagesConfig,
}

impl Validator {
    pub fn new(rules: ValidationConfig, messages: MessagesConfig) -> Self {
        Self { rules, messages }
    }

    pub fn stop_on_first_invalid(&self) -> bool {
        self.rules.stop_on_first_invalid_file
    }

    /// Check extension, emptiness and size bounds, in that order
    pub fn check(&self, file: &FileDescriptor) -> Result<(), Rejection> {
        if !self.is_allowed_extension(&file.name) {
            return Err(Rejection::Extension);
        }
        if file.size == 0 {
            return Err(Rejection::Empty);
        }
        if self.rules.size_limit > 0 && file.size > self.rules.size_limit {
            return Err(Rejection::TooLarge);
        }
        if file.size < self.rules.min_size_limit {
            return Err(Rejection::TooSmall);
        }
        Ok(())
    }

    fn is_allowed_extension(&self, name: &str) -> bool {
        if self.rules.allowed_extensions.is_empty() {
            return true;
        }
        let name = name.to_lowercase();
        self.rules
            .allowed_extensions
            .iter()
            .any(|ext| name.ends_with(&format!(".{}", ext.to_lowercase())))
    }

    /// Message reported for a rejected file
    pub fn message(&self, rejection: Rejection, file_name: &str) -> String {
        let template = match rejection {
            Rejection::Extension => &self.messages.type_error,
            Rejection::Empty => &self.messages.empty_error,
            Rejection::TooLarge => &self.messages.size_error,
            Rejection::TooSmall => &self.messages.min_size_error,
        };
        self.render(template, file_name)
    }

    /// Message reported for an empty batch
    pub fn no_files_message(&self) -> String {
        self.render(&self.messages.no_files_error, "")
    }

    fn render(&self, template: &str, file_name: &str) -> String {
        let extensions = self.rules.allowed_extensions.join(", ").to_lowercase();
        template
            .replacen("{file}", &format_file_name(file_name), 1)
            .replacen("{extensions}", &extensions, 1)
            .replacen("{sizeLimit}", &format_size(self.rules.size_limit), 1)
            .replacen("{minSizeLimit}", &format_size(self.rules.min_size_limit), 1)
    }
}

/// Shorten long names to their first 19 and last 14 characters
pub fn format_file_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= 33 {
        return name.to_string();
    }
    let head: String = chars[..19].iter().collect();
    let tail: String = chars[chars.len() - 14..].iter().collect();
    format!("{head}...{tail}")
}

/// Human readable size, e.g. `1.9MB`. Always at least `0.1kB`.
pub fn format_size(bytes: u64) -> String {
    const SYMBOLS: [&str; 6] = ["kB", "MB", "GB", "TB", "PB", "EB"];

    let mut value = bytes as f64;
    let mut index = 0;
    loop {
        value /= 1024.0;
        if value <= 99.0 || index == SYMBOLS.len() - 1 {
            break;
        }
        index += 1;
    }
    format!("{:.1}{}", value.max(0.1), SYMBOLS[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(rules: ValidationConfig) -> Validator {
        Validator::new(rules, MessagesConfig::default())
    }

    fn file(name: &str, size: u64) -> FileDescriptor {
        FileDescriptor {
            name: name.into(),
            size,
        }
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.1kB");
        assert_eq!(format_size(1024), "1.0kB");
        assert_eq!(format_size(99 * 1024), "99.0kB");
        assert_eq!(format_size(100 * 1024), "0.1MB");
        assert_eq!(format_size(2_000_000), "1.9MB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.0GB");
    }

    #[test]
    fn test_format_file_name() {
        assert_eq!(format_file_name("short.txt"), "short.txt");
        let long = "a-very-long-file-name-that-keeps-going.tar.gz";
        assert_eq!(format_file_name(long), "a-very-long-file-na...s-going.tar.gz");
    }

    #[test]
    fn test_check_order_extension_before_empty() {
        let v = validator(ValidationConfig {
            allowed_extensions: vec!["jpg".into(), "PNG".into()],
            ..Default::default()
        });
        assert_eq!(v.check(&file("doc.pdf", 0)), Err(Rejection::Extension));
        assert_eq!(v.check(&file("photo.JPG", 0)), Err(Rejection::Empty));
        assert_eq!(v.check(&file("image.png", 10)), Ok(()));
        assert_eq!(v.check(&file("jpg", 10)), Err(Rejection::Extension));
    }

    #[test]
    fn test_size_bounds() {
        let v = validator(ValidationConfig {
            size_limit: 100,
            min_size_limit: 10,
            ..Default::default()
        });
        assert_eq!(v.check(&file("a", 101)), Err(Rejection::TooLarge));
        assert_eq!(v.check(&file("a", 9)), Err(Rejection::TooSmall));
        assert_eq!(v.check(&file("a", 100)), Ok(()));
        assert_eq!(v.check(&file("a", 10)), Ok(()));
    }

    #[test]
    fn test_messages_are_templated() {
        let v = validator(ValidationConfig {
            allowed_extensions: vec!["JPG".into(), "png".into()],
            size_limit: 2_000_000,
            ..Default::default()
        });
        assert_eq!(
            v.message(Rejection::Extension, "notes.txt"),
            "notes.txt has an invalid extension. Valid extension(s): jpg, png."
        );
        assert_eq!(
            v.message(Rejection::TooLarge, "big.jpg"),
            "big.jpg is too large, maximum file size is 1.9MB."
        );
        assert_eq!(
            v.message(Rejection::Empty, "empty.png"),
            "empty.png is empty, please select files again without it."
        );
        assert_eq!(v.no_files_message(), "No files to upload.");
    }
}
