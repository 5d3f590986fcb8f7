use bgcache_asset::decode::dds::build_dds;
use bgcache_asset::decode::{TexLoadFlags, TexLoadOptions};
use bgcache_asset::lump::MemoryLumps;
use bgcache_audio::wav::build_wav;
use bgcache_gfx::resources::format::GfxTexelFormat;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

/// 一个关卡用到的资源
pub struct LevelManifest {
    pub textures: Vec<(String, TexLoadOptions)>,
    pub models: Vec<String>,
    pub sounds: Vec<String>,
}

const MODEL_OBJ: &str = "\
v -1 -1 0
v 1 -1 0
v 1 1 0
v -1 1 0
v 0 0 2
vt 0 0
vt 1 0
vt 1 1
vt 0 1
f 1/1 2/2 3/3 4/4
f 1/1 2/2 5/3
f 2/2 3/3 5/3
f 3/3 4/4 5/3
f 4/4 1/1 5/3
";

fn checker_png(size: u32, seed: u32) -> anyhow::Result<Vec<u8>> {
    let img = RgbaImage::from_fn(size, size, |x, y| {
        let on = ((x / 8) + (y / 8) + seed) % 2 == 0;
        if on { Rgba([255, 255, 255, 255]) } else { Rgba([(seed * 40 % 256) as u8, 0, 128, 255]) }
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// 合成一个关卡的 lump：PNG 与 DDS 纹理、OBJ 模型、WAV 音效，外加几个损坏的资源
pub fn synthesize_level(lumps: &MemoryLumps, level: u32, texture_count: u32) -> anyhow::Result<LevelManifest> {
    let mut manifest = LevelManifest {
        textures: Vec::new(),
        models: Vec::new(),
        sounds: Vec::new(),
    };

    for i in 0..texture_count {
        let (name, data, options) = match i % 4 {
            0 => (
                format!("level{}/flat{}.dds", level, i),
                build_dds(GfxTexelFormat::Bc7, 64, 64, 7),
                TexLoadOptions::default(),
            ),
            1 => (
                format!("level{}/wall{}.dds", level, i),
                build_dds(GfxTexelFormat::Bc1, 128, 64, 8),
                TexLoadOptions {
                    flags: TexLoadFlags::empty(),
                    reduce: 1,
                },
            ),
            2 => (
                format!("level{}/sprite{}.png", level, i),
                checker_png(32, i)?,
                TexLoadOptions {
                    flags: TexLoadFlags::GENERATE_MIPS,
                    reduce: 0,
                },
            ),
            _ => (
                format!("level{}/patch{}.png", level, i),
                checker_png(16, i)?,
                TexLoadOptions {
                    flags: TexLoadFlags::INDEXED,
                    reduce: 0,
                },
            ),
        };
        lumps.insert(name.clone(), data);
        manifest.textures.push((name, options));
    }

    // 损坏的纹理：加载失败后保持 Failed
    let broken = format!("level{}/broken.png", level);
    lumps.insert(broken.clone(), b"not a png".to_vec());
    manifest.textures.push((broken, TexLoadOptions::default()));

    for i in 0..4 {
        let name = format!("level{}/model{}.obj", level, i);
        lumps.insert(name.clone(), MODEL_OBJ.as_bytes().to_vec());
        manifest.models.push(name);
    }

    for i in 0..6 {
        let name = format!("level{}/sound{}.wav", level, i);
        let wav = if i % 2 == 0 {
            build_wav(1, 11025, 8, 2048, None)
        } else {
            build_wav(2, 22050, 16, 4096, Some(128))
        };
        lumps.insert(name.clone(), wav);
        manifest.sounds.push(name);
    }
    // lump 不存在的音效，加载后被标记为不可播放
    manifest.sounds.push(format!("level{}/missing.wav", level));

    Ok(manifest)
}
