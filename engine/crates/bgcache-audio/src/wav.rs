use anyhow::Context;

/// WAV 头部信息
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WavInfo {
    pub channels: u16,
    pub rate: u32,
    /// 每个采样的字节数（1 或 2）
    pub width: u16,
    /// 采样帧数（每帧包含 `channels` 个采样）
    pub frames: u32,
    /// `cue` chunk 中的循环起点
    pub loop_start: Option<u32>,
}

/// 解码后的声音，统一为交错的 16-bit 采样
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedSound {
    pub info: WavInfo,
    pub samples: Vec<i16>,
}

impl DecodedSound {
    pub fn duration_secs(&self) -> f32 {
        self.info.frames as f32 / self.info.rate.max(1) as f32
    }
}

fn read_u16(data: &[u8], offset: usize) -> anyhow::Result<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .with_context(|| format!("unexpected end of chunk at {}", offset))
}

fn read_u32(data: &[u8], offset: usize) -> anyhow::Result<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .with_context(|| format!("unexpected end of chunk at {}", offset))
}

/// RIFF 中的子 chunk，chunk 长度为奇数时有一个填充字节
fn chunks(mut data: &[u8]) -> impl Iterator<Item = ([u8; 4], &[u8])> {
    std::iter::from_fn(move || {
        if data.len() < 8 {
            return None;
        }
        let id = [data[0], data[1], data[2], data[3]];
        let len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let body_end = (8 + len).min(data.len());
        let body = &data[8..body_end];
        data = &data[(body_end + (len & 1)).min(data.len())..];
        Some((id, body))
    })
}

/// 解析 RIFF/WAVE PCM
///
/// 只支持 8/16 bit、单声道或立体声。8 bit 的无符号采样会转换为 16 bit 有符号采样。
pub fn decode_wav(data: &[u8]) -> anyhow::Result<DecodedSound> {
    let _span = bgcache_queue::profile_span!("decode_wav");

    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        anyhow::bail!("missing RIFF/WAVE header");
    }

    let mut fmt = None;
    let mut loop_start = None;
    let mut pcm = None;
    for (id, body) in chunks(&data[12..]) {
        match &id {
            b"fmt " => fmt = Some(body),
            // 第一个 cue point 的 sample offset
            b"cue " => loop_start = Some(read_u32(body, 24)?),
            b"data" => pcm = Some(body),
            _ => {}
        }
    }

    let fmt = fmt.context("missing fmt chunk")?;
    let pcm = pcm.context("missing data chunk")?;

    let format = read_u16(fmt, 0)?;
    if format != 1 {
        anyhow::bail!("only Microsoft PCM is supported, got format {}", format);
    }
    let channels = read_u16(fmt, 2)?;
    let rate = read_u32(fmt, 4)?;
    let bits = read_u16(fmt, 14)?;
    if !(1..=2).contains(&channels) {
        anyhow::bail!("unsupported channel count {}", channels);
    }
    if bits != 8 && bits != 16 {
        anyhow::bail!("unsupported sample width {} bits", bits);
    }

    let width = bits / 8;
    let frames = (pcm.len() / (width as usize * channels as usize)) as u32;
    if let Some(start) = loop_start
        && start >= frames
    {
        anyhow::bail!("bad loop start {} for {} frames", start, frames);
    }

    let sample_count = frames as usize * channels as usize;
    let samples = if width == 1 {
        pcm[..sample_count].iter().map(|&s| (s as i16 - 128) << 8).collect()
    } else {
        pcm[..sample_count * 2]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    };

    Ok(DecodedSound {
        info: WavInfo {
            channels,
            rate,
            width,
            frames,
            loop_start,
        },
        samples,
    })
}

/// 生成一个 PCM WAV，采样值是递增的锯齿波；测试和 headless app 用它合成音效
pub fn build_wav(channels: u16, rate: u32, bits: u16, frames: u32, loop_start: Option<u32>) -> Vec<u8> {
    let width = (bits / 8) as u32;
    let data_len = frames * width * channels as u32;

    let mut fmt = Vec::with_capacity(16);
    fmt.extend_from_slice(&1u16.to_le_bytes());
    fmt.extend_from_slice(&channels.to_le_bytes());
    fmt.extend_from_slice(&rate.to_le_bytes());
    fmt.extend_from_slice(&(rate * width * channels as u32).to_le_bytes());
    fmt.extend_from_slice(&((width * channels as u32) as u16).to_le_bytes());
    fmt.extend_from_slice(&bits.to_le_bytes());

    let mut body = Vec::new();
    let mut push_chunk = |id: &[u8; 4], chunk: &[u8]| {
        body.extend_from_slice(id);
        body.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        body.extend_from_slice(chunk);
        if chunk.len() % 2 == 1 {
            body.push(0);
        }
    };

    push_chunk(b"fmt ", &fmt);
    if let Some(start) = loop_start {
        // 一个 cue point: count, id, position, fcc, chunk start, block start, sample offset
        let mut cue = Vec::with_capacity(28);
        cue.extend_from_slice(&1u32.to_le_bytes());
        cue.extend_from_slice(&[0u8; 20]);
        cue.extend_from_slice(&start.to_le_bytes());
        push_chunk(b"cue ", &cue);
    }
    let pcm = (0..data_len).map(|i| (i % 251) as u8).collect::<Vec<_>>();
    push_chunk(b"data", &pcm);

    let mut out = Vec::with_capacity(12 + body.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(4 + body.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_8bit() {
        let sound = decode_wav(&build_wav(1, 11025, 8, 100, None)).unwrap();
        assert_eq!(sound.info.channels, 1);
        assert_eq!(sound.info.rate, 11025);
        assert_eq!(sound.info.width, 1);
        assert_eq!(sound.info.frames, 100);
        assert_eq!(sound.info.loop_start, None);
        // 0 -> -128 << 8
        assert_eq!(sound.samples[0], -32768);
        assert_eq!(sound.samples[1], (1 - 128) << 8);
    }

    #[test]
    fn test_stereo_16bit_with_loop() {
        let sound = decode_wav(&build_wav(2, 22050, 16, 64, Some(10))).unwrap();
        assert_eq!(sound.info.channels, 2);
        assert_eq!(sound.info.frames, 64);
        assert_eq!(sound.info.loop_start, Some(10));
        assert_eq!(sound.samples.len(), 128);
        assert_eq!(sound.samples[0], i16::from_le_bytes([0, 1]));
    }

    #[test]
    fn test_bad_loop_start() {
        assert!(decode_wav(&build_wav(1, 11025, 16, 10, Some(10))).is_err());
    }

    #[test]
    fn test_missing_header() {
        assert!(decode_wav(b"RIFX\0\0\0\0WAVE").is_err());
        assert!(decode_wav(b"").is_err());
    }

    #[test]
    fn test_non_pcm_rejected() {
        let mut wav = build_wav(1, 11025, 16, 4, None);
        // fmt chunk body 从 20 开始，format 字段改为 3 (IEEE float)
        wav[20] = 3;
        assert!(decode_wav(&wav).is_err());
    }
}
