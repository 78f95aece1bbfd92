use dcm_common::DiskImage;

use crate::{EngineMessage, ValidationResult};

/// 一组镜像的状态校验
pub struct DiskImagesValidator<'a> {
    images: &'a [DiskImage],
}

impl<'a> DiskImagesValidator<'a> {
    pub fn new(images: &'a [DiskImage]) -> Self {
        Self { images }
    }

    pub fn disk_images_not_locked(&self) -> ValidationResult {
        self.fail_for(DiskImage::is_locked, EngineMessage::DisksLocked)
    }

    pub fn disk_images_not_illegal(&self) -> ValidationResult {
        self.fail_for(DiskImage::is_illegal, EngineMessage::DisksIllegal)
    }

    fn fail_for(&self, predicate: fn(&DiskImage) -> bool, message: EngineMessage) -> ValidationResult {
        let mut aliases: Vec<&str> = self
            .images
            .iter()
            .filter(|image| predicate(image))
            .map(|image| image.disk_alias.as_str())
            .collect();

        if aliases.is_empty() {
            return ValidationResult::valid();
        }
        // 同一磁盘的多个镜像只报告一次
        aliases.sort_unstable();
        aliases.dedup();
        ValidationResult::fail(message).with_variable("diskAliases", aliases.join(", "))
    }
}
