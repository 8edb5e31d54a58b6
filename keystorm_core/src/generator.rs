//! Input sequence generation.
//!
//! Four families of input are produced here: weighted random sequences drawn
//! from a seedable [`ChaCha8Rng`], and three fixed catalogs (edge cases,
//! stress sequences and behavior expectations) that are identical on every
//! call. The strategy generators used by aggressive campaigns also live here.

use crate::input::KeySequence;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use serde::Serialize;
use std::fmt;

/// Special-key tokens drawn by the random generator.
pub const SPECIAL_KEY_TOKENS: &[&str] = &[
    "<CR>", "<ESC>", "<Tab>", "<BS>", "<Space>", "<Up>", "<Down>", "<Left>", "<Right>", "<Home>",
    "<End>", "<PageUp>", "<PageDown>", "<Delete>", "<C-a>", "<C-c>", "<C-v>", "<C-x>", "<C-z>",
    "<C-y>",
];

const MOVEMENT_KEYS: &[&str] = &[
    "<Up>", "<Down>", "<Left>", "<Right>", "<Home>", "<End>", "<PageUp>", "<PageDown>", "<C-f>",
    "<C-b>", "gg", "G", "0", "$", "h", "j", "k", "l", "w", "b", "e", "^",
];

const MODE_KEYS: &[&str] = &["i", "<ESC>", "a", "o", "O"];

const INSERT_ENTRY_KEYS: &[&str] = &["i", "a", "o", "O", "I", "A", "s", "S"];

const SAMPLE_TEXT: &str = "The quick brown fox jumps over the lazy dog. ";

/// Ex commands that are odd, malformed or expensive but never quit.
const COMMAND_FUZZ: &[&str] = &[
    ":", ":!", ":help", ":version", ":set all", ":map", ":unmap", ":ab", ":unab", ":highlight",
    ":syntax", ":colorscheme", "::", ":::", ":;", ":;;", ":/garbage", ":?garbage", ":s//g", ":%s",
    ":1", ":99999", ":999999", ":0", ":-1", ":%", ":$", ":command", ":function", ":let",
    ":execute", ":echo", ":call", ":source", ":runtime", ":packadd", ":loadview", ":mkview",
];

pub const UNICODE_BASIC: &[&str] = &[
    "α", "β", "γ", "δ", "é", "ñ", "ü", "ç", "ø", "æ",
    "€", "¥", "£", "©", "®", "™", "°", "±", "×", "÷",
];
pub const UNICODE_WIDE: &[&str] = &[
    "中", "文", "日", "本", "語", "한", "글", "ｱ",
    "Ｗ", "😀", "🎉", "🚀", "🔥", "💯", "🦀",
];
pub const UNICODE_HISTORIC: &[&str] = &[
    "𓀀", "𓂀", "𒀀", "𐎀", "ᚠ", "ᚱ", "𐌰", "𐤀", "ꦲ", "𑀅",
];
pub const UNICODE_ZERO_WIDTH: &[&str] = &[
    "\u{200B}", "\u{200C}", "\u{200D}", "\u{FEFF}", "\u{2060}", "\u{0301}", "\u{0308}",
    "\u{0336}", "\u{20DD}", "\u{FE0F}",
];
pub const UNICODE_RTL: &[&str] = &[
    "א", "ב", "ש", "ל", "ו", "م", "ر", "ح", "ب", "ا", "\u{200F}", "\u{202E}",
];
pub const UNICODE_MATH: &[&str] = &[
    "∀", "∂", "∃", "∅", "∇", "∈", "∑", "∞", "∫", "≠", "≤", "⊕", "𝔸", "𝕫",
];
pub const UNICODE_EMOJI_SEQUENCES: &[&str] = &[
    "👨\u{200D}👩\u{200D}👧\u{200D}👦",
    "🏳\u{FE0F}\u{200D}🌈",
    "👍🏽",
    "🇺🇸",
    "🧑\u{200D}💻",
    "❤\u{FE0F}",
];
pub const UNICODE_CONTROL: &[&str] = &[
    "\u{0000}", "\u{0001}", "\u{0007}", "\u{0008}", "\u{000B}", "\u{000C}", "\u{007F}",
    "\u{0080}", "\u{0085}", "\u{009B}", "\u{009F}",
];

struct UnicodeTier {
    weight: u32,
    chars: &'static [&'static str],
}

const UNICODE_TIERS: &[UnicodeTier] = &[
    UnicodeTier { weight: 30, chars: UNICODE_BASIC },
    UnicodeTier { weight: 15, chars: UNICODE_WIDE },
    UnicodeTier { weight: 10, chars: UNICODE_HISTORIC },
    UnicodeTier { weight: 10, chars: UNICODE_ZERO_WIDTH },
    UnicodeTier { weight: 10, chars: UNICODE_RTL },
    UnicodeTier { weight: 10, chars: UNICODE_MATH },
    UnicodeTier { weight: 10, chars: UNICODE_EMOJI_SEQUENCES },
    UnicodeTier { weight: 5, chars: UNICODE_CONTROL },
];

/// Fixed insert-mode payloads for insertion stress.
fn stress_payloads() -> Vec<String> {
    let printable: String = (0x20u8..=0x7e).map(char::from).collect();
    vec![
        "a".repeat(100),
        "A".repeat(100),
        "1".repeat(100),
        "!".repeat(100),
        printable.repeat(10),
        "😀".repeat(20),
        "\t".repeat(50),
        "\n".repeat(20),
        " ".repeat(100),
        "a\tb\tc\nd\ne\tf".to_string(),
        "{{{{[[[[((()))]]]]}}}}".to_string(),
        "`~!@#$%^&*()_+-=[]{}|;':\",./?".to_string(),
    ]
}

fn pick<'a, T, R: Rng + ?Sized>(rng: &mut R, items: &'a [T]) -> &'a T {
    &items[rng.random_range(0..items.len())]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub min_length: usize,
    pub max_length: usize,
    pub include_special_keys: bool,
    pub include_unicode: bool,
    /// `None` seeds from the OS for non-reproducible coverage.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            min_length: 5,
            max_length: 100,
            include_special_keys: true,
            include_unicode: true,
            seed: None,
        }
    }
}

impl GeneratorConfig {
    /// Wider length range and no seed, used by aggressive campaigns.
    pub fn aggressive() -> Self {
        Self {
            min_length: 1,
            max_length: 300,
            ..Self::default()
        }
    }
}

/// Generation strategy for aggressive campaigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Random,
    Movement,
    Command,
    Insertion,
    Unicode,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::Random,
        Strategy::Movement,
        Strategy::Command,
        Strategy::Insertion,
        Strategy::Unicode,
    ];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::Random => "random",
            Strategy::Movement => "movement",
            Strategy::Command => "command",
            Strategy::Insertion => "insertion",
            Strategy::Unicode => "unicode",
        };
        f.write_str(s)
    }
}

/// A catalog entry: a fixed sequence with a stable name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedSequence {
    pub name: String,
    pub sequence: KeySequence,
}

impl NamedSequence {
    fn new(name: &str, sequence: impl Into<KeySequence>) -> Self {
        Self {
            name: name.to_string(),
            sequence: sequence.into(),
        }
    }
}

/// Declares whether a sequence should terminate the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BehaviorTestCase {
    pub name: String,
    pub sequence: KeySequence,
    pub expected_exit: bool,
    pub description: String,
}

impl BehaviorTestCase {
    fn new(name: &str, sequence: &str, expected_exit: bool, description: &str) -> Self {
        Self {
            name: name.to_string(),
            sequence: KeySequence::from(sequence),
            expected_exit,
            description: description.to_string(),
        }
    }
}

pub struct SequenceGenerator {
    config: GeneratorConfig,
    rng: ChaCha8Rng,
}

impl SequenceGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Random sequence with a length drawn from the configured range.
    pub fn generate(&mut self) -> KeySequence {
        let max = self.config.max_length.max(self.config.min_length);
        let length = self.rng.random_range(self.config.min_length..=max);
        self.generate_with_length(length)
    }

    /// Random sequence of exactly `length` draws. Each draw is one token, so
    /// the string may hold more characters than `length`.
    pub fn generate_with_length(&mut self, length: usize) -> KeySequence {
        let mut out = String::new();
        for _ in 0..length {
            let choice: f64 = self.rng.random();
            if choice < 0.70 {
                out.push(char::from(self.rng.random_range(0x20u8..=0x7e)));
            } else if choice < 0.85 && self.config.include_special_keys {
                out.push_str(*pick(&mut self.rng, SPECIAL_KEY_TOKENS));
            } else if choice < 0.95 && self.config.include_unicode {
                let c = self.unicode_char();
                out.push_str(c);
            } else {
                out.push_str("<ESC>");
                out.push_str(*pick(&mut self.rng, &["h", "j", "k", "l"]));
            }
        }
        KeySequence::new(out)
    }

    fn unicode_char(&mut self) -> &'static str {
        let total: u32 = UNICODE_TIERS.iter().map(|t| t.weight).sum();
        let mut roll = self.rng.random_range(0..total);
        for tier in UNICODE_TIERS {
            if roll < tier.weight {
                return *pick(&mut self.rng, tier.chars);
            }
            roll -= tier.weight;
        }
        *pick(&mut self.rng, UNICODE_BASIC)
    }

    /// Mostly movement keys with occasional mode switches, starting from
    /// normal mode.
    pub fn movement_sequence(&mut self, length: usize) -> KeySequence {
        let mut out = String::from("<ESC>");
        for _ in 0..length {
            let keys = if self.rng.random_bool(0.8) {
                MOVEMENT_KEYS
            } else {
                MODE_KEYS
            };
            out.push_str(*pick(&mut self.rng, keys));
        }
        KeySequence::new(out)
    }

    /// Enters insert mode, types between 10 and `max_chars` characters of
    /// sample text and leaves insert mode.
    pub fn insertion_sequence(&mut self, max_chars: usize) -> KeySequence {
        let pool: Vec<char> = SAMPLE_TEXT
            .chars()
            .chain('a'..='z')
            .chain('A'..='Z')
            .chain('0'..='9')
            .collect();
        let count = self.rng.random_range(10..=max_chars.max(10));
        let mut out = String::from("i");
        for _ in 0..count {
            out.push(*pick(&mut self.rng, &pool));
        }
        out.push_str("<ESC>");
        KeySequence::new(out)
    }

    /// One to five garbage ex commands, each submitted with `<CR>`.
    pub fn command_sequence(&mut self) -> KeySequence {
        let count = self.rng.random_range(1..=5);
        let mut out = String::new();
        for _ in 0..count {
            out.push_str(*pick(&mut self.rng, COMMAND_FUZZ));
            out.push_str("<CR>");
        }
        KeySequence::new(out)
    }

    pub fn insertion_stress_sequence(&mut self) -> KeySequence {
        let payloads = stress_payloads();
        let entry = pick(&mut self.rng, INSERT_ENTRY_KEYS);
        let payload = pick(&mut self.rng, &payloads);
        KeySequence::new(format!("{entry}{payload}<ESC>"))
    }

    /// `length` characters drawn only from the Unicode tiers.
    pub fn unicode_sequence(&mut self, length: usize) -> KeySequence {
        let mut out = String::new();
        for _ in 0..length {
            let c = self.unicode_char();
            out.push_str(c);
        }
        KeySequence::new(out)
    }

    pub fn generate_for(&mut self, strategy: Strategy) -> KeySequence {
        match strategy {
            Strategy::Random => self.generate(),
            Strategy::Movement => {
                let length = self.rng.random_range(5..=20);
                self.movement_sequence(length)
            }
            Strategy::Command => self.command_sequence(),
            Strategy::Insertion => self.insertion_stress_sequence(),
            Strategy::Unicode => {
                let length = self.rng.random_range(20..=100);
                self.unicode_sequence(length)
            }
        }
    }
}

/// Deterministic catalog of known failure classes.
pub fn edge_case_sequences() -> Vec<NamedSequence> {
    let family = UNICODE_EMOJI_SEQUENCES[0];
    vec![
        NamedSequence::new("burst_h", "h".repeat(50)),
        NamedSequence::new("burst_j", "j".repeat(50)),
        NamedSequence::new("burst_l", "l".repeat(50)),
        NamedSequence::new("burst_k", "k".repeat(50)),
        NamedSequence::new("jump_far_and_back", format!("G{}ggG", "j".repeat(100))),
        NamedSequence::new(
            "page_scroll",
            format!("{}{}", "<C-f>".repeat(10), "<C-b>".repeat(10)),
        ),
        NamedSequence::new("large_line_number", ":12345<CR>"),
        NamedSequence::new("overflowing_line_number", ":99999999999999999999999<CR>"),
        NamedSequence::new("negative_line_number", ":-99999<CR>"),
        NamedSequence::new("invalid_shell_command", ":!<invalid><CR>"),
        NamedSequence::new("chained_commands", ":set number<CR>:set nonumber<CR>"),
        NamedSequence::new("empty_commands", ":<CR>::<CR>:<ESC>"),
        NamedSequence::new("buffer_switch_storm", ":bprev<CR>:bnext<CR>".repeat(10)),
        NamedSequence::new("unicode_stress", UNICODE_BASIC.concat().repeat(5)),
        NamedSequence::new("control_storm", "<C-a><C-c><C-v><C-x>".repeat(10)),
        NamedSequence::new("emoji_cluster_backspace_end", format!("i{family}<BS><BS><ESC>")),
        NamedSequence::new(
            "emoji_cluster_delete_start",
            format!("i{family}<ESC>0<Delete><Delete>"),
        ),
        NamedSequence::new(
            "emoji_cluster_cursor_walk",
            format!("i{family}{family}<Left><BS><Right><BS><ESC>"),
        ),
        NamedSequence::new("rtl_with_emoji", "iשלום 😀 مرحبا 👍<BS><BS><ESC>"),
        NamedSequence::new(
            "zero_width_joiner_run",
            format!("ia{}b<BS><BS><ESC>", "\u{200D}".repeat(20)),
        ),
        NamedSequence::new(
            "combining_mark_stack",
            format!("ie{}<BS><ESC>", "\u{0301}".repeat(30)),
        ),
    ]
}

/// Long, high-volume sequences aimed at resource exhaustion.
pub fn stress_sequences() -> Vec<NamedSequence> {
    vec![
        NamedSequence::new("long_movement", "hjkl".repeat(250)),
        NamedSequence::new("long_arrow_movement", "<Down><Right><Up><Left>".repeat(200)),
        NamedSequence::new("mode_switch_storm", "i<ESC>".repeat(200)),
        NamedSequence::new("visual_mode_storm", "v<ESC>V<ESC><C-v><ESC>".repeat(100)),
        NamedSequence::new("large_insert", format!("i{}<ESC>", "x".repeat(2000))),
        NamedSequence::new("newline_flood", format!("i{}<ESC>", "<CR>".repeat(500))),
        NamedSequence::new("yank_put_chain", format!("iline<ESC>{}", "yyp".repeat(200))),
        NamedSequence::new("undo_redo_chain", format!("ihello<ESC>{}", "u<C-r>".repeat(150))),
        NamedSequence::new("macro_replay", format!("iabc<ESC>qaddpq{}", "@a".repeat(50))),
        NamedSequence::new("huge_counts", "99999j99999k99999l99999h"),
        NamedSequence::new("search_storm", "/a<CR>n".repeat(100)),
        NamedSequence::new(
            "window_churn",
            format!("{}:only<CR>", "<C-w>s<C-w>v<C-w>w".repeat(10)),
        ),
        NamedSequence::new("buffer_churn", format!("{}:bfirst<CR>", ":enew!<CR>".repeat(30))),
    ]
}

/// Terminal conventions the editor is expected to honour.
pub fn behavior_test_cases() -> Vec<BehaviorTestCase> {
    [
        ("ctrl_c_no_exit", "<C-c>", false, "Ctrl+C must not exit"),
        ("ctrl_c_repeated_no_exit", "<C-c><C-c><C-c>", false, "Repeated Ctrl+C must not exit"),
        ("ctrl_backslash_no_exit", "<C-\\>", false, "Ctrl+\\ must not exit"),
        ("ctrl_d_no_exit", "<C-d>", false, "Ctrl+D must not exit"),
        ("escape_no_exit", "<ESC>", false, "Escape must not exit"),
        ("arrows_no_exit", "<Up><Down><Left><Right>", false, "Arrow keys must not exit"),
        ("home_end_no_exit", "<Home><End>", false, "Home/End must not exit"),
        ("paging_no_exit", "<PageUp><PageDown>", false, "Page Up/Down must not exit"),
        ("delete_no_exit", "<Delete>", false, "Delete must not exit"),
        ("backspace_no_exit", "<BS>", false, "Backspace must not exit"),
        ("tab_no_exit", "<Tab>", false, "Tab must not exit"),
        ("enter_no_exit", "<CR>", false, "Enter must not exit"),
        ("ctrl_letters_no_exit", "<C-a><C-x><C-v><C-y>", false, "Ctrl combinations must not exit"),
        ("quit_command_exits", "<ESC>:q<CR>", true, ":q on an unmodified buffer must exit"),
        ("force_quit_exits", "<ESC>:q!<CR>", true, ":q! must exit unconditionally"),
        ("quit_all_exits", "<ESC>:qa!<CR>", true, ":qa! must exit unconditionally"),
    ]
    .into_iter()
    .map(|(name, keys, exits, description)| {
        BehaviorTestCase::new(name, keys, exits, description)
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::encode_with_report;

    fn seeded(seed: u64) -> SequenceGenerator {
        SequenceGenerator::new(GeneratorConfig {
            seed: Some(seed),
            ..GeneratorConfig::default()
        })
    }

    #[test]
    fn seeded_generation_is_reproducible() {
        let mut a = seeded(42);
        let mut b = seeded(42);
        let first: Vec<_> = (0..20).map(|_| a.generate()).collect();
        let second: Vec<_> = (0..20).map(|_| b.generate()).collect();
        assert_eq!(first, second);

        let mut c = seeded(43);
        let other: Vec<_> = (0..20).map(|_| c.generate()).collect();
        assert_ne!(first, other);
    }

    #[test]
    fn ascii_only_generation_respects_length() {
        let mut generator = SequenceGenerator::new(GeneratorConfig {
            min_length: 10,
            max_length: 10,
            include_special_keys: false,
            include_unicode: false,
            seed: Some(7),
        });
        for _ in 0..50 {
            let seq = generator.generate();
            let without_compound = seq.as_str().replace("<ESC>", "");
            assert_eq!(without_compound.chars().count(), 10);
            assert!(seq.as_str().is_ascii());
        }
    }

    #[test]
    fn generated_special_keys_are_all_encodable() {
        for token in SPECIAL_KEY_TOKENS {
            let report = encode_with_report(token);
            assert!(report.unknown_tokens.is_empty(), "{token}");
            assert!(!report.bytes.is_empty(), "{token}");
        }
    }

    #[test]
    fn unicode_sequence_is_non_ascii_heavy() {
        let mut generator = seeded(3);
        let seq = generator.unicode_sequence(50);
        assert!(!seq.as_str().is_ascii());
        assert!(seq.len() >= 50);
    }

    #[test]
    fn command_sequences_never_quit() {
        let mut generator = seeded(9);
        for _ in 0..200 {
            let seq = generator.command_sequence();
            assert!(seq.as_str().ends_with("<CR>"));
            assert!(!seq.as_str().contains(":q"));
            assert!(!seq.as_str().contains(":x"));
            assert!(!seq.as_str().contains(":wq"));
        }
    }

    #[test]
    fn insertion_sequences_are_bracketed_by_mode_keys() {
        let mut generator = seeded(5);
        let seq = generator.insertion_sequence(50);
        assert!(seq.as_str().starts_with('i'));
        assert!(seq.as_str().ends_with("<ESC>"));
        let body = seq.len() - "i<ESC>".len();
        assert!((10..=50).contains(&body));

        let stress = generator.insertion_stress_sequence();
        assert!(INSERT_ENTRY_KEYS.iter().any(|k| stress.as_str().starts_with(k)));
        assert!(stress.as_str().ends_with("<ESC>"));
    }

    #[test]
    fn catalogs_are_deterministic_and_named_uniquely() {
        assert_eq!(edge_case_sequences(), edge_case_sequences());
        assert_eq!(stress_sequences(), stress_sequences());

        for catalog in [edge_case_sequences(), stress_sequences()] {
            let mut names: Vec<_> = catalog.iter().map(|c| c.name.clone()).collect();
            names.sort();
            names.dedup();
            assert_eq!(names.len(), catalog.len());
            for entry in &catalog {
                assert!(!entry.sequence.is_empty());
                assert!(!entry.sequence.as_str().contains(":q"), "{} would quit", entry.name);
            }
        }
    }

    #[test]
    fn edge_cases_pin_emoji_and_rtl_regressions() {
        let names: Vec<_> = edge_case_sequences().into_iter().map(|c| c.name).collect();
        for required in [
            "emoji_cluster_backspace_end",
            "emoji_cluster_delete_start",
            "rtl_with_emoji",
            "zero_width_joiner_run",
        ] {
            assert!(names.iter().any(|n| n == required), "missing {required}");
        }
    }

    #[test]
    fn behavior_cases_encode_to_bytes() {
        let cases = behavior_test_cases();
        assert!(cases.iter().any(|c| c.expected_exit));
        assert!(cases.iter().any(|c| !c.expected_exit));
        for case in &cases {
            let report = encode_with_report(case.sequence.as_str());
            assert!(!report.bytes.is_empty(), "{} encodes to nothing", case.name);
            assert!(report.unknown_tokens.is_empty(), "{} has unknown tokens", case.name);
        }
        let ctrl_c = cases.iter().find(|c| c.name == "ctrl_c_no_exit").unwrap();
        assert!(!ctrl_c.expected_exit);
    }

    #[test]
    fn every_strategy_produces_input() {
        let mut generator = seeded(11);
        for strategy in Strategy::ALL {
            assert!(!generator.generate_for(strategy).is_empty(), "{strategy}");
        }
    }
}
