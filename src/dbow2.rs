//! Text vocabularies in the DBoW2 / ORB-SLAM layout (`ORBvoc.txt`).
//!
//! First line: `k L scoring weighting`, with scoring and weighting given as their DBoW2
//! enum codes. Then one line per node except the root, parents before children:
//! `parent is_leaf descriptor_bytes... weight`. Node ids follow line order (the root is 0)
//! and word ids follow the order in which leaves appear.

use std::{
    io::{BufRead, Write},
    path::Path,
};
use tracing::info;

use crate::vocab::{parse_err, parse_field};
use crate::*;

impl Vocabulary {
    /// Read a vocabulary in the DBoW2 text layout. The descriptor length is taken from the
    /// first node.
    pub fn load_dbow2_text<R: BufRead>(input: R) -> BowResult<Self> {
        let mut lines = input.lines();
        let header = match lines.next() {
            Some(line) => line?,
            None => return Err(parse_err(1, "missing header")),
        };
        let mut v = Vocabulary::empty(parse_header(&header)?, 0);

        for (i, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            push_line(&mut v, &line, i + 2)?;
        }
        v.check_structure()
            .map_err(|(node, msg)| parse_err(node as usize + 1, msg))?;

        info!(
            words = v.num_words(),
            nodes = v.num_nodes(),
            "Loaded DBoW2 vocabulary"
        );
        Ok(v)
    }

    /// Write the vocabulary in the DBoW2 text layout. Build parameters other than `k`,
    /// depth, weighting and scoring are not stored.
    pub fn save_dbow2_text<W: Write>(&self, mut out: W) -> BowResult<()> {
        writeln!(
            out,
            "{} {}  {} {}",
            self.params().k,
            self.params().depth,
            scoring_code(self.scoring()),
            weighting_code(self.weighting())
        )?;
        for node in self.nodes.iter().skip(1) {
            writeln!(
                out,
                "{} {} {} {}",
                node.parent.unwrap_or(0),
                node.word_id.is_some() as u8,
                node.descriptor,
                node.weight
            )?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn load_dbow2_text_file<P: AsRef<Path>>(file: P) -> BowResult<Self> {
        let file = std::fs::File::open(file)?;
        Self::load_dbow2_text(std::io::BufReader::new(file))
    }

    pub fn save_dbow2_text_file<P: AsRef<Path>>(&self, file: P) -> BowResult<()> {
        let file = std::fs::File::create(file)?;
        self.save_dbow2_text(std::io::BufWriter::new(file))
    }
}

fn push_line(v: &mut Vocabulary, line: &str, lineno: usize) -> BowResult<()> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(parse_err(
            lineno,
            format!("expected at least 3 fields, found {}", fields.len()),
        ));
    }
    let parent: NodeId = parse_field(fields[0], "parent id", lineno)?;
    let leaf = match fields[1] {
        "0" => false,
        "1" => true,
        s => return Err(parse_err(lineno, format!("invalid leaf flag {:?}", s))),
    };
    let (bytes, weight) = fields[2..].split_at(fields.len() - 3);
    let weight: WordValue = parse_field(weight[0], "weight", lineno)?;

    if v.num_nodes() == 1 {
        v.desc_len = bytes.len();
    }
    let descriptor = Descriptor::from_text(&bytes.join(" "), v.desc_len)
        .map_err(|e| parse_err(lineno, e.to_string()))?;
    let word = if leaf {
        Some(v.num_words() as WordId)
    } else {
        None
    };
    v.push_node(parent, word, weight, descriptor)
        .map_err(|msg| parse_err(lineno, msg))?;
    Ok(())
}

fn parse_header(line: &str) -> BowResult<VocabularyParams> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 4 {
        return Err(parse_err(1, format!("expected 4 header fields, found {}", fields.len())));
    }
    let scoring: u8 = parse_field(fields[2], "scoring", 1)?;
    let weighting: u8 = parse_field(fields[3], "weighting", 1)?;
    let params = VocabularyParams {
        k: parse_field(fields[0], "k", 1)?,
        depth: parse_field(fields[1], "depth", 1)?,
        scoring: scoring_from_code(scoring)
            .ok_or_else(|| parse_err(1, format!("unknown scoring code {}", scoring)))?,
        weighting: weighting_from_code(weighting)
            .ok_or_else(|| parse_err(1, format!("unknown weighting code {}", weighting)))?,
        ..Default::default()
    };
    if params.k < 2 || params.depth == 0 {
        return Err(parse_err(
            1,
            format!("invalid shape k={} L={}", params.k, params.depth),
        ));
    }
    Ok(params)
}

const SCORINGS: [ScoringType; 6] = [
    ScoringType::L1,
    ScoringType::L2,
    ScoringType::ChiSquare,
    ScoringType::KL,
    ScoringType::Bhattacharyya,
    ScoringType::DotProduct,
];

const WEIGHTINGS: [WeightingType; 4] = [
    WeightingType::TfIdf,
    WeightingType::TF,
    WeightingType::IDF,
    WeightingType::Binary,
];

fn scoring_code(s: ScoringType) -> usize {
    SCORINGS.iter().position(|&x| x == s).unwrap_or(0)
}

fn scoring_from_code(code: u8) -> Option<ScoringType> {
    SCORINGS.get(code as usize).copied()
}

fn weighting_code(w: WeightingType) -> usize {
    WEIGHTINGS.iter().position(|&x| x == w).unwrap_or(0)
}

fn weighting_from_code(code: u8) -> Option<WeightingType> {
    WEIGHTINGS.get(code as usize).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const SMALL: &str = "2 2  0 1
0 0 1 2 0
1 1 1 2 0.5
1 1 1 3 0.75
0 1 3 4 0.25
";

    #[test]
    fn loads_hand_written_file() {
        let voc = Vocabulary::load_dbow2_text(SMALL.as_bytes()).unwrap();
        assert_eq!(voc.num_nodes(), 5);
        assert_eq!(voc.num_words(), 3);
        assert_eq!(voc.descriptor_len(), 2);
        assert_eq!(voc.scoring(), ScoringType::L1);
        assert_eq!(voc.weighting(), WeightingType::TF);
        assert_eq!(voc.word_weight(1), Some(0.75));
        assert_eq!(voc.word_weight(2), Some(0.25));
        assert_eq!(voc.word_descriptor(1), Some(&Descriptor::from([1u8, 3])));
        assert_eq!(voc.word_id(&Descriptor::from([3u8, 4])).unwrap(), 2);
        assert_eq!(voc.word_id(&Descriptor::from([1u8, 2])).unwrap(), 0);
        assert_eq!(voc.parent_at_level(1, 1), Some(1));
        assert_eq!(voc.parent_at_level(2, 1), Some(4));
    }

    #[test]
    fn round_trip_keeps_the_tree() {
        let mut rng = StdRng::seed_from_u64(3);
        let training: Vec<Vec<Descriptor>> = (0..6)
            .map(|_| (0..40).map(|_| Descriptor::from(rng.gen::<[u8; 32]>())).collect())
            .collect();
        let params = VocabularyParams {
            weighting: WeightingType::IDF,
            scoring: ScoringType::Bhattacharyya,
            ..VocabularyParams::new(4, 3)
        };
        let voc = Vocabulary::create(&training, params).unwrap();

        let mut buf = Vec::new();
        voc.save_dbow2_text(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("4 3  4 2\n"));
        let loaded = Vocabulary::load_dbow2_text(text.as_bytes()).unwrap();
        assert_eq!(voc, loaded);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ORBvoc.txt");
        voc.save_dbow2_text_file(&path).unwrap();
        let loaded = Vocabulary::load_dbow2_text_file(&path).unwrap();
        for img in &training {
            assert_eq!(voc.transform(img).unwrap(), loaded.transform(img).unwrap());
        }
    }

    #[test]
    fn malformed_files_are_rejected() {
        let bad = [
            "",
            "2 2 0\n",
            "2 2  9 0\n",
            "2 2  0 7\n",
            "1 2  0 0\n",
            "2 2  0 0\n0 2 1 2 0\n",
            "2 2  0 0\n0 1 1 x 0.5\n",
            "2 2  0 0\n0 1 1 2 0.5\n0 1 1 2 3 0.5\n",
            "2 2  0 0\n0 1 1 2 0.5\n1 1 1 2 0.5\n",
            "2 2  0 0\n0 0 1 2 0\n",
            "2 1  0 0\n0 0 1 2 0\n1 1 1 2 0.5\n",
        ];
        for text in bad {
            assert!(
                matches!(
                    Vocabulary::load_dbow2_text(text.as_bytes()),
                    Err(BowErr::Parse { .. })
                ),
                "{:?}",
                text
            );
        }
    }

    #[test]
    fn empty_file_body_gives_empty_vocabulary() {
        let voc = Vocabulary::load_dbow2_text("10 6  0 0\n".as_bytes()).unwrap();
        assert!(voc.is_empty());
        assert_eq!(voc.params().k, 10);
        assert_eq!(voc.params().depth, 6);
    }
}
