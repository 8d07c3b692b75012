/// Frame checksum: the sum of the character codes of `text`, as uppercase hex
/// left-padded with zeros to at least 4 digits.
///
/// The running sum is not masked, so an input whose sum exceeds 0xFFFF renders
/// with more than 4 digits. Real frames never get that long.
pub fn checksum(text: &str) -> String {
    let total: u64 = text.chars().map(|c| c as u64).sum();
    format!("{:04X}", total)
}
