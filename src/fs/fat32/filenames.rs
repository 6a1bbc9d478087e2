//! FAT32 filename handling.
//!
//! Three representations cooperate here: [`Compact8Dot3Filename`] is the
//! raw 11-byte name+extension field of a directory cluster entry,
//! [`ShortFilename`] is the working form of an 8.3 name with its optional
//! `~N` numeric tail split out, and [`LongFilename`] is a caller-supplied
//! name validated against the long-filename rules and able to produce the
//! basis short name prescribed by the Microsoft FAT specification.

use alloc::format;
use alloc::string::String;
use bytemuck::{Pod, Zeroable};

use crate::errors::{CanFail, FilesystemError};
use crate::MAX_FILENAME_LENGTH;

/// Characters that may not appear in an 8.3 filename.
pub const FORBIDDEN_8_3_FILENAME_CHARACTERS: &str = "\"*/:<>?\\|+,;=[]";

/// Characters that may not appear in a long filename.
pub const FORBIDDEN_LONG_FILENAME_CHARACTERS: &str = "<>:\"/\\|?*";

/// The raw name field of a directory cluster entry: eight name bytes and
/// three extension bytes, both space padded.
#[derive(Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Compact8Dot3Filename {
    pub name: [u8; 8],
    pub extension: [u8; 3],
}

impl Compact8Dot3Filename {
    /// Builds a compact name from already-scrubbed components. Characters
    /// past the 8/3 field widths are ignored.
    pub fn new(name: &str, extension: &str) -> Self {
        let mut compact = Self {
            name: [b' '; 8],
            extension: [b' '; 3],
        };

        for (slot, byte) in compact.name.iter_mut().zip(name.bytes()) {
            *slot = byte;
        }

        for (slot, byte) in compact.extension.iter_mut().zip(extension.bytes()) {
            *slot = byte;
        }

        compact
    }

    /// Returns the first byte of the name field, which doubles as the
    /// in-use / unused / end-of-directory sentinel.
    pub fn first_char(&self) -> u8 {
        self.name[0]
    }

    /// Returns `true` when the name field holds the given dot entry name
    /// (`.` or `..`).
    pub fn matches(&self, name: &str) -> bool {
        let mut reference = [b' '; 8];

        for (slot, byte) in reference.iter_mut().zip(name.bytes()) {
            *slot = byte;
        }

        self.name == reference
    }

    /// Renders the `NAME.EXT` form, dropping the padding spaces.
    pub fn render(&self) -> String {
        let mut rendered = String::new();

        for &byte in self.name.iter() {
            if byte == b' ' || byte == 0x00 {
                break;
            }

            rendered.push(byte as char);
        }

        if self.extension != [b' '; 3] {
            rendered.push('.');

            for &byte in self.extension.iter() {
                if byte == b' ' || byte == 0x00 {
                    break;
                }

                rendered.push(byte as char);
            }
        }

        rendered
    }

    /// Renders the volume label held by a volume-information entry: the
    /// name and extension fields concatenated without a dot, with trailing
    /// spaces trimmed.
    pub fn render_volume_label(&self) -> String {
        let mut label = String::new();

        for &byte in self.name.iter().chain(self.extension.iter()) {
            label.push(byte as char);
        }

        while label.ends_with(' ') {
            label.pop();
        }

        label
    }
}

impl core::fmt::Debug for Compact8Dot3Filename {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Maps a character onto its 8.3-permissible counterpart.
///
/// Returns `(None, _)` for characters that are simply dropped (spaces and
/// periods), `(Some(c), false)` for characters carried over (letters are
/// uppercased) and `(Some('_'), true)` for impermissible characters, where
/// the `true` marks the conversion as lossy.
pub fn permissible_short_name_character(current: char) -> (Option<char>, bool) {
    if current.is_ascii_alphabetic() {
        return (Some(current.to_ascii_uppercase()), false);
    }

    if current == ' ' || current == '.' {
        //  The specification strips all leading and embedded spaces, and
        //  every period other than the one introducing the extension.

        return (None, false);
    }

    if current.is_ascii()
        && (current as u32) > 31
        && (current as u32) != 127
        && !FORBIDDEN_8_3_FILENAME_CHARACTERS.contains(current)
    {
        return (Some(current), false);
    }

    (Some('_'), true)
}

/// An 8.3 short filename with its numeric tail tracked separately.
#[derive(Clone, Debug, Default)]
pub struct ShortFilename {
    name: String,
    name_with_tail: String,
    extension: String,
    compact: String,
    lossy_conversion: bool,
    numeric_tail: Option<u32>,
}

impl ShortFilename {
    /// Builds a short filename from caller-supplied name and extension
    /// components, scrubbing impermissible characters.
    pub fn from_components(name: &str, extension: &str) -> Self {
        let mut filename = Self::default();

        for current in name.chars() {
            if filename.name.len() >= 8 {
                break;
            }

            let (kept, lossy) = permissible_short_name_character(current);

            if let Some(kept) = kept {
                filename.name.push(kept);
            }

            filename.lossy_conversion |= lossy;
        }

        for current in extension.chars() {
            if filename.extension.len() >= 3 {
                break;
            }

            let (kept, lossy) = permissible_short_name_character(current);

            if let Some(kept) = kept {
                filename.extension.push(kept);
            }

            filename.lossy_conversion |= lossy;
        }

        filename.detect_numeric_tail();
        filename.regenerate();

        filename
    }

    /// Builds a short filename from a compact on-disk name. The compact
    /// name is coming off the platter and is trusted, so no scrubbing.
    pub fn from_compact(compact: &Compact8Dot3Filename) -> Self {
        let mut filename = Self::default();

        for &byte in compact.name.iter() {
            if byte == b' ' {
                break;
            }

            filename.name.push(byte as char);
        }

        if compact.extension != [b' '; 3] {
            for &byte in compact.extension.iter() {
                if byte == b' ' {
                    break;
                }

                filename.extension.push(byte as char);
            }
        }

        filename.detect_numeric_tail();
        filename.regenerate();

        filename
    }

    /// Returns the name, including the numeric tail when one exists.
    pub fn name(&self) -> &str {
        if self.numeric_tail.is_some() {
            &self.name_with_tail
        } else {
            &self.name
        }
    }

    /// Returns the extension component.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Returns `true` when both components are empty.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.extension.is_empty()
    }

    /// Returns the numeric tail, when the filename carries one.
    pub fn numeric_tail(&self) -> Option<u32> {
        self.numeric_tail
    }

    /// Returns the `NAME~N.EXT` rendering.
    pub fn compact_8_3_filename(&self) -> &str {
        &self.compact
    }

    /// Returns whether scrubbing replaced any characters.
    pub fn lossy_conversion(&self) -> bool {
        self.lossy_conversion
    }

    /// Checks whether this filename is a derivative of the given basis: the
    /// extensions match, both carry a tail or neither does, and the name
    /// characters agree up to the tilde.
    pub fn is_derivative_of_basis(&self, basis: &ShortFilename) -> bool {
        if self.extension != basis.extension {
            return false;
        }

        if self.numeric_tail.is_some() != basis.numeric_tail.is_some() {
            return false;
        }

        if self.numeric_tail.is_none() {
            return self.name == basis.name;
        }

        let own = self.name_with_tail.as_bytes();
        let other = basis.name_with_tail.as_bytes();

        for index in 0..own.len().min(other.len()) {
            if own[index] == b'~' {
                return true;
            }

            if own[index] != other[index] {
                return false;
            }
        }

        false
    }

    /// Attaches a numeric tail, truncating the base so `base~N` still fits
    /// in the eight character name field.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::Fat32NumericTailOutOfRange`] unless
    /// `1 <= tail <= 999999`.
    pub fn add_numeric_tail(&mut self, tail: u32) -> CanFail<FilesystemError> {
        if !(1..=999_999).contains(&tail) {
            return Err(FilesystemError::Fat32NumericTailOutOfRange);
        }

        self.numeric_tail = Some(tail);
        self.regenerate();

        Ok(())
    }

    /// Computes the MSDOS checksum over the space-padded 11-byte name.
    pub fn checksum(&self) -> u8 {
        let mut msdos_format_name = [b' '; 11];

        for (slot, byte) in msdos_format_name.iter_mut().zip(self.name().bytes()) {
            *slot = byte;
        }

        for (slot, byte) in msdos_format_name[8..].iter_mut().zip(self.extension.bytes()) {
            *slot = byte;
        }

        let mut checksum: u8 = 0;

        for byte in msdos_format_name {
            checksum = (if checksum & 1 != 0 { 0x80u8 } else { 0 })
                .wrapping_add(checksum >> 1)
                .wrapping_add(byte);
        }

        checksum
    }

    /// Returns the compact on-disk form of the filename.
    pub fn to_compact(&self) -> Compact8Dot3Filename {
        Compact8Dot3Filename::new(self.name(), &self.extension)
    }

    //  Examines characters from the back of the name moving frontward; a
    //  run of digits behind a tilde is a numeric tail.
    fn detect_numeric_tail(&mut self) {
        self.numeric_tail = None;

        let bytes = self.name.as_bytes();

        if bytes.is_empty() {
            return;
        }

        let mut front_of_number = bytes.len() - 1;

        while front_of_number > 0 {
            if !bytes[front_of_number].is_ascii_digit() {
                break;
            }

            front_of_number -= 1;
        }

        if front_of_number == bytes.len() - 1 || bytes[front_of_number] != b'~' {
            return;
        }

        self.numeric_tail = self.name[front_of_number + 1..].parse().ok();

        if self.numeric_tail.is_some() {
            self.name.truncate(front_of_number);
        }
    }

    fn regenerate(&mut self) {
        if let Some(tail) = self.numeric_tail {
            let tail_digits = format!("{tail}");

            self.name_with_tail = self.name.clone();

            let generated_length = self.name_with_tail.len() + tail_digits.len() + 1;

            if generated_length > 8 {
                let chars_to_erase = generated_length - 8;
                self.name_with_tail
                    .truncate(self.name_with_tail.len() - chars_to_erase);
            }

            self.name_with_tail.push('~');
            self.name_with_tail.push_str(&tail_digits);
        }

        self.compact = String::from(self.name());

        if !self.extension.is_empty() {
            self.compact.push('.');
            self.compact.push_str(&self.extension);
        }
    }
}

/// A validated long filename.
#[derive(Clone, Debug)]
pub struct LongFilename {
    name: String,
}

impl LongFilename {
    /// Builds a long filename, stripping leading spaces and trailing
    /// spaces and periods.
    pub fn new(name: &str) -> Self {
        let stripped = name
            .trim_start_matches(' ')
            .trim_end_matches(|c| c == ' ' || c == '.');

        Self {
            name: String::from(stripped),
        }
    }

    /// Returns the filename.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the filename length in characters.
    pub fn len(&self) -> usize {
        self.name.len()
    }

    /// Returns `true` when the filename is empty.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// Validates the filename against the long-filename rules.
    ///
    /// # Errors
    ///
    /// - [`FilesystemError::EmptyFilename`] for an empty name.
    /// - [`FilesystemError::FilenameTooLong`] past
    ///   [`MAX_FILENAME_LENGTH`](crate::MAX_FILENAME_LENGTH).
    /// - [`FilesystemError::FilenameContainsForbiddenCharacters`] for
    ///   unprintable characters or any of `<>:"/\|?*`.
    pub fn is_valid(&self) -> CanFail<FilesystemError> {
        if self.name.is_empty() {
            return Err(FilesystemError::EmptyFilename);
        }

        if self.name.len() > MAX_FILENAME_LENGTH {
            return Err(FilesystemError::FilenameTooLong);
        }

        for current in self.name.chars() {
            let printable = current.is_ascii() && (0x20..0x7F).contains(&(current as u32));

            if !printable || FORBIDDEN_LONG_FILENAME_CHARACTERS.contains(current) {
                return Err(FilesystemError::FilenameContainsForbiddenCharacters);
            }
        }

        Ok(())
    }

    /// Tests whether the filename already complies with the 8.3 format,
    /// returning the equivalent short filename when it does.
    pub fn as_8_dot_3(&self) -> Option<ShortFilename> {
        //  Anything longer than NAME.EXT cannot be an 8.3 filename

        if self.name.len() > 12 {
            return None;
        }

        for current in self.name.chars() {
            if current.is_ascii_lowercase() || FORBIDDEN_8_3_FILENAME_CHARACTERS.contains(current)
            {
                return None;
            }
        }

        let extension_location = self.name.rfind('.');

        match extension_location {
            None => {
                if self.name.len() <= 8 {
                    Some(ShortFilename::from_components(&self.name, ""))
                } else {
                    None
                }
            }
            Some(location) => {
                //  Exactly one period, no more than 8 characters in front of
                //  it and no more than 3 behind it

                if self.name.find('.') != Some(location) {
                    return None;
                }

                if location > 8 {
                    return None;
                }

                if self.name.len() - location > 4 {
                    return None;
                }

                Some(ShortFilename::from_components(
                    &self.name[..location],
                    &self.name[location + 1..],
                ))
            }
        }
    }

    /// Generates the basis short name for the long filename, following the
    /// rules in the Microsoft FAT specification. Dropped or replaced
    /// characters and components that overflow the 8/3 fields mark the
    /// conversion as lossy and seed the numeric tail with 1; conflict
    /// resolution against the directory contents may bump it further.
    pub fn basis_name(&self) -> ShortFilename {
        let mut basis = ShortFilename::default();

        let extension_location = self.name.rfind('.');
        let name_portion_length = extension_location.unwrap_or(self.name.len());

        for current in self.name[..name_portion_length].chars() {
            if basis.name.len() >= 8 {
                break;
            }

            match permissible_short_name_character(current) {
                (None, _) => {
                    basis.lossy_conversion = true;
                }
                (Some(kept), lossy) => {
                    basis.name.push(kept);
                    basis.lossy_conversion |= lossy;
                }
            }
        }

        if let Some(location) = extension_location {
            for current in self.name[location + 1..].chars() {
                if basis.extension.len() >= 3 {
                    break;
                }

                match permissible_short_name_character(current) {
                    (None, _) => {
                        basis.lossy_conversion = true;
                    }
                    (Some(kept), lossy) => {
                        basis.extension.push(kept);
                        basis.lossy_conversion |= lossy;
                    }
                }
            }
        }

        let extension_overflows = extension_location
            .map(|location| self.name.len() - (location + 1) > 3)
            .unwrap_or(false);

        if basis.lossy_conversion || name_portion_length > 8 || extension_overflows {
            //  Tail 1 is always in range
            let _ = basis.add_numeric_tail(1);
        } else {
            basis.regenerate();
        }

        basis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubbing_uppercases_and_replaces_forbidden_characters() {
        let filename = ShortFilename::from_components("test+1", "");

        assert_eq!(filename.name(), "TEST_1");
        assert!(filename.lossy_conversion());

        let spaced = ShortFilename::from_components("test 1", "");

        assert_eq!(spaced.name(), "TEST1");
        assert!(!spaced.lossy_conversion());
    }

    #[test]
    fn numeric_tails_are_detected_in_compact_names() {
        let compact = Compact8Dot3Filename::new("TEST1~12", "TX");
        let filename = ShortFilename::from_compact(&compact);

        assert_eq!(filename.numeric_tail(), Some(12));
        assert_eq!(filename.name(), "TEST1~12");
        assert_eq!(filename.compact_8_3_filename(), "TEST1~12.TX");

        let no_tail = ShortFilename::from_compact(&Compact8Dot3Filename::new("TEST1", ""));
        assert_eq!(no_tail.numeric_tail(), None);
    }

    #[test]
    fn numeric_tail_truncates_the_base_to_fit() {
        let mut filename = ShortFilename::from_components("LONGBASE", "TXT");

        filename.add_numeric_tail(1).unwrap();
        assert_eq!(filename.name(), "LONGBA~1");

        filename.add_numeric_tail(999_999).unwrap();
        assert_eq!(filename.name(), "L~999999");

        assert_eq!(
            filename.add_numeric_tail(0).unwrap_err(),
            FilesystemError::Fat32NumericTailOutOfRange
        );
        assert_eq!(
            filename.add_numeric_tail(1_000_000).unwrap_err(),
            FilesystemError::Fat32NumericTailOutOfRange
        );
    }

    #[test]
    fn derivative_test_compares_through_the_tilde() {
        let mut basis = ShortFilename::from_components("TEST", "");
        basis.add_numeric_tail(1).unwrap();

        let mut derivative = ShortFilename::from_components("TEST", "");
        derivative.add_numeric_tail(14).unwrap();

        assert!(derivative.is_derivative_of_basis(&basis));

        let other_extension = ShortFilename::from_compact(&Compact8Dot3Filename::new(
            "TEST~2", "TXT",
        ));
        assert!(!other_extension.is_derivative_of_basis(&basis));

        let no_tail = ShortFilename::from_components("TEST", "");
        assert!(!no_tail.is_derivative_of_basis(&basis));

        let different_base =
            ShortFilename::from_compact(&Compact8Dot3Filename::new("TOAST~2", ""));
        assert!(!different_base.is_derivative_of_basis(&basis));
    }

    #[test]
    fn long_filename_strips_lead_and_trail() {
        assert_eq!(LongFilename::new("  notes.txt  ").name(), "notes.txt");
        assert_eq!(LongFilename::new("archive...").name(), "archive");
        assert_eq!(
            LongFilename::new("...Name.With.Leading.Periods.lNg").name(),
            "...Name.With.Leading.Periods.lNg"
        );
    }

    #[test]
    fn long_filename_validation() {
        assert_eq!(
            LongFilename::new("").is_valid().unwrap_err(),
            FilesystemError::EmptyFilename
        );
        assert_eq!(
            LongFilename::new(&"x".repeat(256)).is_valid().unwrap_err(),
            FilesystemError::FilenameTooLong
        );
        assert_eq!(
            LongFilename::new("what?").is_valid().unwrap_err(),
            FilesystemError::FilenameContainsForbiddenCharacters
        );
        assert!(LongFilename::new("A diam maecenas sed enim ut sem.Pellentesque")
            .is_valid()
            .is_ok());
    }

    #[test]
    fn eight_dot_three_detection() {
        let plain = LongFilename::new("README").as_8_dot_3().unwrap();
        assert_eq!(plain.name(), "README");
        assert_eq!(plain.extension(), "");

        let with_extension = LongFilename::new("KERNEL8.IMG").as_8_dot_3().unwrap();
        assert_eq!(with_extension.name(), "KERNEL8");
        assert_eq!(with_extension.extension(), "IMG");

        assert!(LongFilename::new("readme").as_8_dot_3().is_none());
        assert!(LongFilename::new("TOOLONGNAME").as_8_dot_3().is_none());
        assert!(LongFilename::new("A.B.C").as_8_dot_3().is_none());
        assert!(LongFilename::new("NAME.LONG").as_8_dot_3().is_none());
    }

    #[test]
    fn basis_names_match_the_reference_volume() {
        let cases = [
            ("test 1", "TEST1~1"),
            ("test+1", "TEST_1~1"),
            ("Test 1.t x", "TEST1~1.TX"),
            ("Test1.t+x", "TEST1~1.T_X"),
            ("...Name.With.Leading.Periods.lNg", "NAMEWI~1.LNG"),
            ("this is a long subdirectory name", "THISIS~1"),
            ("A diam maecenas sed enim ut sem.Pellentesque", "ADIAMM~1.PEL"),
            ("file testing", "FILETE~1"),
        ];

        for (long_name, expected_compact) in cases {
            let basis = LongFilename::new(long_name).basis_name();

            assert_eq!(
                basis.compact_8_3_filename(),
                expected_compact,
                "basis of {long_name:?}"
            );
        }
    }

    #[test]
    fn uppercase_only_conversion_does_not_seed_a_tail() {
        let basis = LongFilename::new("FooBar").basis_name();

        assert_eq!(basis.name(), "FOOBAR");
        assert_eq!(basis.numeric_tail(), None);
    }

    #[test]
    fn checksum_matches_the_msdos_algorithm() {
        let mut filename = ShortFilename::from_components("ADIAMM", "PEL");
        filename.add_numeric_tail(1).unwrap();

        assert_eq!(filename.name(), "ADIAMM~1");
        assert_eq!(filename.checksum(), 0x5C);
    }

    #[test]
    fn compact_rendering() {
        let compact = Compact8Dot3Filename::new("TEST1", "TX");
        assert_eq!(compact.render(), "TEST1.TX");

        let label = Compact8Dot3Filename::new("TESTFAT3", "2");
        assert_eq!(label.render_volume_label(), "TESTFAT32");

        assert!(Compact8Dot3Filename::new(".", "").matches("."));
        assert!(Compact8Dot3Filename::new("..", "").matches(".."));
        assert!(!Compact8Dot3Filename::new(".", "").matches(".."));
    }
}
