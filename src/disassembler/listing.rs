use crate::decipher::{decipher, RenderSink};
use crate::disassembler::Disassembler;
use crate::hexdump::hexdump_undeciphered;

const HEXDUMP_STRIDE: usize = 8;

impl Disassembler<'_> {
    /// Generate the text listing from the discovery results.
    ///
    /// Every recorded (offset, language) pair is re-run in render mode,
    /// ascending offset then language name. A `*` column marks confirmed
    /// entry points, a `; [name]` line announces a non-trivial language
    /// change, problem messages appear as `; !` lines at their offset.
    /// The listing is followed by the external cross-references and a
    /// hexdump of the bytes never deciphered.
    #[tracing::instrument(skip(self))]
    pub fn render(&self) -> String {
        let mut str = String::new();
        str.push_str("  Addr   Code         Instructions\n");
        str.push_str("-----------------------------------\n");
        //            *0x8000  20 06 80     JSR 0x8006

        let mut offsets: Vec<usize> = self.decoded.keys().copied().collect();
        for offset in self.problems.keys() {
            if !self.decoded.contains_key(offset) {
                offsets.push(*offset);
            }
        }
        offsets.sort_unstable();

        let mut previous_lang: Option<String> = None;
        for offset in offsets {
            let address = self.origin as usize + offset;
            for (name, lang) in self.decoded.get(&offset).into_iter().flatten() {
                if previous_lang.as_deref() != Some(name.as_str()) && !lang.is_trivial() {
                    str.push_str(format!("; [{}]\n", name).as_str());
                }
                previous_lang = Some(name.clone());

                let mut sink = RenderSink::default();
                let size = decipher(lang, self.image, offset, self.origin, &mut sink)
                    .expect("render disagrees with discovery");
                let bytes = self.image[offset..offset + size]
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<Vec<String>>()
                    .join(" ");
                let marker = if self.entry_points.contains(&offset) {
                    '*'
                } else {
                    ' '
                };
                str.push_str(
                    format!("{}0x{:04x}  {:11}  {}\n", marker, address, bytes, sink.out).as_str(),
                );
            }
            for problem in self.problems.get(&offset).into_iter().flatten() {
                str.push_str(format!(" 0x{:04x}  ; ! {}\n", address, problem).as_str());
            }
        }

        if !self.externals.is_empty() {
            str.push_str("\nExternal references:\n");
            for (address, langs) in &self.externals {
                let langs = langs.iter().cloned().collect::<Vec<String>>().join(", ");
                str.push_str(format!("  0x{:04x}  {}\n", address, langs).as_str());
            }
        }

        let undeciphered =
            hexdump_undeciphered(self.image, self.origin, &self.deciphered, HEXDUMP_STRIDE);
        if !undeciphered.is_empty() {
            str.push_str("\nUndeciphered bytes:\n");
            str.push_str(&undeciphered);
            str.push('\n');
        }

        str
    }
}
