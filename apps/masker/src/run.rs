//! 逐文件工作单元.
//!
//! 每个输入文件是完全独立的任务: 读取 -> 流水线 -> 写出 (+ 可选
//! overlay 与输入副本). 文件内任一环节失败都会中止该文件,
//! 清理已写出的半成品, 并把文件计入 skipped; 不影响其他文件.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use fetal_berry::infer::BrainModel;
use fetal_berry::pipeline::{mask_filename, MaskError, MaskingPipeline};
use fetal_berry::{BrainMask, MriScan};

use crate::config::MaskerConfig;

/// 处理单个输入文件.
///
/// 成功时所有配置的输出 (掩膜, overlay, 输入副本) 均已写出;
/// 失败时本文件已写出的输出全部被删除.
pub fn mask_one<M: BrainModel>(
    pipeline: &MaskingPipeline<M>,
    cfg: &MaskerConfig,
    input: &Path,
) -> Result<(), MaskError> {
    info!("Processing {}", input.display());

    let scan = MriScan::open(input)?;
    let mask = pipeline.create_mask(&scan)?;

    // glob 产出的一定是文件路径, 必有文件名.
    let base = input.file_name().unwrap().to_string_lossy();
    let out_name = mask_filename(&base, &cfg.suffix);

    let mut written = Vec::new();
    let res = write_outputs(&scan, &mask, cfg, input, &base, &out_name, &mut written);
    if res.is_err() {
        // 逐文件原子性: 不留半成品.
        for p in &written {
            let _ = fs::remove_file(p);
        }
    }
    res
}

/// 依次写出掩膜, overlay 与输入副本. 每个目标路径先登记进
/// `written` 再动笔, 失败时调用方可按清单回收.
fn write_outputs(
    scan: &MriScan,
    mask: &BrainMask,
    cfg: &MaskerConfig,
    input: &Path,
    base: &str,
    out_name: &str,
    written: &mut Vec<PathBuf>,
) -> Result<(), MaskError> {
    let mask_path = cfg.output_dir.join(out_name);
    written.push(mask_path.clone());
    mask.save(&mask_path)?;

    for (dir, background) in cfg.overlay_dirs() {
        let path = dir.join(out_name);
        written.push(path.clone());
        scan.overlay(mask, background).save(&path)?;
    }

    if let Some(dir) = cfg.input_dest_dir() {
        let path = dir.join(base);
        written.push(path.clone());
        fs::copy(input, &path)?;
    }
    Ok(())
}

/// 将失败文件的名字写入清单文件, 一行一个.
pub fn write_skipped_list(path: &Path, skipped: &[PathBuf]) -> std::io::Result<()> {
    let mut lines = skipped
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    lines.sort_unstable();
    lines.push(String::new()); // 尾随换行
    fs::write(path, lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetal_berry::infer::IntensityOracle;
    use fetal_berry::pipeline::{MaskOptions, MaskingPipeline};
    use ndarray::Array3;
    use nifti::NiftiHeader;

    fn batch_config(input_dir: PathBuf, output_dir: PathBuf) -> MaskerConfig {
        MaskerConfig {
            input_dir,
            output_dir,
            pattern: "*.nii".to_owned(),
            suffix: "_mask.nii".to_owned(),
            smooth: true,
            skipped_list: Some("skipped.txt".to_owned()),
            overlay_dest: None,
            overlay_backgrounds: vec![],
            input_dest: None,
        }
    }

    /// 一批文件中混入一个损坏文件: 该文件单独失败且不留任何输出,
    /// 其余文件正常产出掩膜, 失败清单恰好只含损坏文件名.
    #[test]
    fn test_corrupted_input_is_isolated() {
        let root = std::env::temp_dir().join("masker-test-batch");
        let input_dir = root.join("in");
        let output_dir = root.join("out");
        fs::create_dir_all(&input_dir).unwrap();
        fs::create_dir_all(&output_dir).unwrap();

        for name in ["a.nii", "b.nii"] {
            let data = Array3::<f32>::zeros((2, 8, 8));
            MriScan::fake_with_header(&NiftiHeader::default(), data)
                .save(input_dir.join(name))
                .unwrap();
        }
        fs::write(input_dir.join("broken.nii"), b"\xde\xad\xbe\xef").unwrap();

        let cfg = batch_config(input_dir.clone(), output_dir.clone());
        let pipeline = MaskingPipeline::new(IntensityOracle, MaskOptions::default());

        let mut skipped = Vec::new();
        for name in ["a.nii", "b.nii", "broken.nii"] {
            let path = input_dir.join(name);
            if mask_one(&pipeline, &cfg, &path).is_err() {
                skipped.push(path);
            }
        }

        // 完好文件各自产出掩膜, 损坏文件失败且没有半成品残留.
        assert!(output_dir.join("a_mask.nii").is_file());
        assert!(output_dir.join("b_mask.nii").is_file());
        assert!(!output_dir.join("broken_mask.nii").exists());
        assert_eq!(skipped, [input_dir.join("broken.nii")]);

        let list = cfg.skipped_list_path().unwrap();
        write_skipped_list(&list, &skipped).unwrap();
        assert_eq!(fs::read_to_string(&list).unwrap(), "broken.nii\n");

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_skipped_list_content() {
        let dir = std::env::temp_dir().join("masker-test-skipped");
        fs::create_dir_all(&dir).unwrap();
        let list = dir.join("skipped.txt");

        let skipped = [
            PathBuf::from("/data/b.nii.gz"),
            PathBuf::from("/data/a.nii"),
        ];
        write_skipped_list(&list, &skipped).unwrap();

        let content = fs::read_to_string(&list).unwrap();
        assert_eq!(content, "a.nii\nb.nii.gz\n");
        fs::remove_dir_all(&dir).unwrap();
    }
}
