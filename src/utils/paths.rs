use std::path::PathBuf;

// 运行时目录均相对于工作目录
const DATA_DIR: &str = "data";
const RESOURCE_DIR: &str = "resources";

pub fn log_path() -> PathBuf {
    PathBuf::from("log")
}

#[cfg(not(test))]
pub fn data_path() -> PathBuf {
    PathBuf::from(DATA_DIR)
}

// 测试时写入临时目录
#[cfg(test)]
pub fn data_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("zhenxun-test-{}", std::process::id()))
        .join(DATA_DIR)
}

pub fn image_path() -> PathBuf {
    PathBuf::from(RESOURCE_DIR).join("image")
}

pub fn record_path() -> PathBuf {
    PathBuf::from(RESOURCE_DIR).join("record")
}

pub fn temp_path() -> PathBuf {
    PathBuf::from(RESOURCE_DIR).join("temp")
}

pub fn text_path() -> PathBuf {
    PathBuf::from(RESOURCE_DIR).join("text")
}

/// 群帮助图片缓存目录
pub fn group_help_path() -> PathBuf {
    data_path().join("group_help")
}

/// 按钮、图标等界面素材
pub fn icon_path() -> PathBuf {
    image_path().join("other")
}
