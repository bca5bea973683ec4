//! WAV encoding for finalized recordings

use anyhow::{Context, Result};
use hound::{WavReader, WavSpec, WavWriter};
use std::io::Cursor;

use super::CapturedAudio;

/// Encode captured samples as a 16-bit PCM WAV file held in memory
pub fn encode_wav(audio: &CapturedAudio) -> Result<Vec<u8>> {
    if audio.sample_rate == 0 || audio.channels == 0 {
        anyhow::bail!(
            "Invalid audio format: {} Hz, {} channels",
            audio.sample_rate,
            audio.channels
        );
    }

    let spec = WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
        for &sample in &audio.samples {
            writer
                .write_sample(sample)
                .context("Failed to write WAV sample")?;
        }
        writer.finalize().context("Failed to finalize WAV data")?;
    }

    Ok(cursor.into_inner())
}

/// Duration of an encoded WAV buffer in seconds
pub fn wav_duration_secs(wav: &[u8]) -> Result<f64> {
    let reader = WavReader::new(Cursor::new(wav)).context("Failed to read WAV header")?;
    let spec = reader.spec();
    let frames = reader.duration();
    Ok(frames as f64 / spec.sample_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_readable_wav() {
        let audio = CapturedAudio {
            sample_rate: 16000,
            channels: 1,
            samples: vec![0; 32000],
        };

        let wav = encode_wav(&audio).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert!((wav_duration_secs(&wav).unwrap() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_zero_sample_rate() {
        let audio = CapturedAudio {
            sample_rate: 0,
            channels: 1,
            samples: vec![1, 2, 3],
        };
        assert!(encode_wav(&audio).is_err());
    }
}
