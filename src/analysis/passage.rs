//! Text the patient reads aloud while recording

pub const READING_PASSAGE: &str = "The sun rises over the peaceful mountains, painting the sky \
with shades of orange and pink. Birds begin their morning songs while dew glistens on the grass. \
In the distance, a gentle stream flows through the valley, carrying memories of yesterday and \
promises of tomorrow. Life moves forward with each passing moment, bringing new opportunities and \
challenges. We navigate through our days with hope and determination, finding strength in the \
connections we share with others. Time teaches us valuable lessons about patience, resilience, \
and the importance of cherishing each experience.";

pub fn passage_word_count() -> usize {
    READING_PASSAGE.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passage_is_single_spaced() {
        assert!(!READING_PASSAGE.contains("  "));
        assert!(passage_word_count() > 80);
    }
}
