use bytemuck::{Pod, Zeroable};

/// Mirrors the `BlendpackContract` block injected ahead of every fragment.
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct ContractUniforms {
    pub progress: f32,
    pub intensity: f32,
    pub time: f32,
    pub _padding0: f32,
    pub resolution: [f32; 2],
    pub _padding1: [f32; 2],
}

unsafe impl Zeroable for ContractUniforms {}
unsafe impl Pod for ContractUniforms {}

impl ContractUniforms {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            progress: 0.0,
            intensity: 1.0,
            time: 0.0,
            _padding0: 0.0,
            resolution: [width as f32, height as f32],
            _padding1: [0.0; 2],
        }
    }

    pub fn set_resolution(&mut self, width: u32, height: u32) {
        self.resolution = [width as f32, height as f32];
    }

    pub fn update(&mut self, progress: f32, intensity: f32, time: f32) {
        self.progress = progress;
        self.intensity = intensity.max(0.0);
        self.time = time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_std140_block_size() {
        assert_eq!(std::mem::size_of::<ContractUniforms>(), 32);
        let uniforms = ContractUniforms::new(640, 360);
        let floats: [f32; 8] = bytemuck::cast(uniforms);
        assert_eq!(&floats[4..6], &[640.0, 360.0]);
    }

    #[test]
    fn intensity_never_negative() {
        let mut uniforms = ContractUniforms::new(1, 1);
        uniforms.update(1.2, -0.5, 3.0);
        assert_eq!(uniforms.progress, 1.2);
        assert_eq!(uniforms.intensity, 0.0);
    }
}
