/// Hexdump of the image regions never covered by a successful decode.
///
/// Rows whose bytes were all deciphered are skipped entirely; in mixed
/// rows the deciphered bytes are masked as `..` so the undeciphered
/// ones stand out.
pub fn hexdump_undeciphered(
    image: &[u8],
    origin: u32,
    deciphered: &[bool],
    stride: usize,
) -> String {
    let mut str = String::new();

    for (row, bytes) in image.chunks(stride).enumerate() {
        let start = row * stride;
        if bytes.iter().enumerate().all(|(ix, _)| deciphered[start + ix]) {
            continue;
        }
        if !str.is_empty() {
            str.push('\n');
        }
        str.push_str(format!("{:04x}:", origin as usize + start).as_str());
        for (ix, byte) in bytes.iter().enumerate() {
            str.push(' ');
            if deciphered[start + ix] {
                str.push_str("..");
            } else {
                str.push_str(format!("{:02x}", byte).as_str());
            }
        }
    }

    str
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_masks_deciphered_bytes() {
        let image = [0xa9, 0x01, 0xde, 0xad];
        let deciphered = [true, true, false, false];
        assert_eq!(
            hexdump_undeciphered(&image, 0x8000, &deciphered, 4),
            "8000: .. .. de ad"
        );
    }

    #[test]
    fn test_skips_fully_deciphered_rows() {
        let mut image = vec![0u8; 12];
        image[8] = 0xff;
        let mut deciphered = vec![true; 12];
        deciphered[8] = false;
        assert_eq!(
            hexdump_undeciphered(&image, 0, &deciphered, 4),
            "0008: ff .. .. .."
        );
    }

    #[test]
    fn test_empty_when_everything_deciphered() {
        let image = [0x60];
        assert_eq!(hexdump_undeciphered(&image, 0, &[true], 8), "");
    }
}
