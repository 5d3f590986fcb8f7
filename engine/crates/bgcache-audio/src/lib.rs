pub mod audio_queue;
pub mod sound;
pub mod wav;

pub use audio_queue::{AudioLoaderQueue, AudioLoaderStats, QueueOutcome};
pub use sound::{ActorId, PlayInfo, SoundHandle, SoundId, SoundSink, SoundSource, SoundTable};
