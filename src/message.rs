use crate::utils::paths::{image_path, record_path};
use crate::warn;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Serialize;
use simd_json::owned::{Object, Value};
use std::path::PathBuf;

/// 消息段 (Segment)
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Segment {
    #[serde(rename = "type")]
    pub type_: String,
    pub data: Object,
}

impl Segment {
    pub fn new(type_: &str, data: Object) -> Self {
        Self {
            type_: type_.to_string(),
            data,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.data.get(key) {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        let mut seg_obj = Object::new();
        seg_obj.insert("type".into(), Value::from(self.type_.clone()));
        seg_obj.insert("data".into(), Value::from(self.data.clone()));
        Value::from(seg_obj)
    }
}

/// 图片来源
///
/// 解析顺序：绝对路径 > base64 > 图片资源目录下的文件名
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// http 链接或已带 base64:// 前缀的字符串
    Url(String),
    Base64(String),
    /// 相对于 resources/image 的文件名
    Named(String),
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl ImageSource {
    /// 解析为 OneBot 可用的 file 字段，资源缺失时返回 None
    pub fn resolve(&self) -> Option<String> {
        match self {
            ImageSource::Url(url) => Some(url.clone()),
            ImageSource::Base64(b64) => Some(if b64.starts_with("base64://") {
                b64.clone()
            } else {
                format!("base64://{}", b64)
            }),
            ImageSource::Named(name) => {
                if name.starts_with("http") || name.starts_with("base64://") {
                    return Some(name.clone());
                }
                read_as_base64(&image_path().join(name), "图片")
            }
            ImageSource::Path(path) => read_as_base64(path, "图片"),
            ImageSource::Bytes(bytes) => Some(format!("base64://{}", BASE64.encode(bytes))),
        }
    }
}

impl From<&str> for ImageSource {
    fn from(s: &str) -> Self {
        if s.starts_with("http") || s.starts_with("base64://") {
            ImageSource::Url(s.to_string())
        } else {
            ImageSource::Named(s.to_string())
        }
    }
}

impl From<String> for ImageSource {
    fn from(s: String) -> Self {
        ImageSource::from(s.as_str())
    }
}

impl From<PathBuf> for ImageSource {
    fn from(p: PathBuf) -> Self {
        ImageSource::Path(p)
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(b: Vec<u8>) -> Self {
        ImageSource::Bytes(b)
    }
}

fn read_as_base64(path: &std::path::Path, kind: &str) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => Some(format!("base64://{}", BASE64.encode(bytes))),
        Err(_) => {
            warn!(target: "Message", "{} {} 缺失...", kind, path.display());
            None
        }
    }
}

/// 语音来源：文件路径必须存在；链接直接发送；其余视为语音资源目录下的文件名
#[derive(Debug, Clone)]
pub enum RecordSource {
    Path(PathBuf),
    Url(String),
    Named(String),
    Bytes(Vec<u8>),
}

impl RecordSource {
    pub fn resolve(&self) -> Option<String> {
        match self {
            RecordSource::Path(path) => read_as_base64(path, "音频"),
            RecordSource::Url(url) => Some(url.clone()),
            RecordSource::Named(name) => {
                if name.contains("http") {
                    Some(name.clone())
                } else {
                    read_as_base64(&record_path().join(name), "音频")
                }
            }
            RecordSource::Bytes(bytes) => Some(format!("base64://{}", BASE64.encode(bytes))),
        }
    }
}

/// 消息链 (Message Chain)
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct Message(Vec<Segment>);

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 通用添加方法：手动构建 Segment
    pub fn add(mut self, type_: &str, data: Object) -> Self {
        self.0.push(Segment::new(type_, data));
        self
    }

    /// 所有文本段拼接
    #[cfg(test)]
    pub(crate) fn plain_text(&self) -> String {
        self.0
            .iter()
            .filter(|s| s.type_ == "text")
            .filter_map(|s| s.get_str("text"))
            .collect()
    }

    /// 以若干字符串字段构建消息段
    fn fields(self, type_: &str, fields: &[(&str, String)]) -> Self {
        let mut data = Object::new();
        for (k, v) in fields {
            data.insert((*k).into(), Value::from(v.as_str()));
        }
        self.add(type_, data)
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.fields("text", &[("text", text.into())])
    }

    /// QQ 表情
    pub fn face(self, id: impl ToString) -> Self {
        self.fields("face", &[("id", id.to_string())])
    }

    pub fn json(self, data: impl Into<String>) -> Self {
        self.fields("json", &[("data", data.into())])
    }

    pub fn xml(self, data: impl Into<String>) -> Self {
        self.fields("xml", &[("data", data.into())])
    }

    /// 图片，资源缺失时跳过该段
    pub fn image(self, source: impl Into<ImageSource>) -> Self {
        match source.into().resolve() {
            Some(file) => self.fields("image", &[("file", file)]),
            None => self,
        }
    }

    /// 语音，资源缺失时跳过该段
    pub fn record(self, source: RecordSource) -> Self {
        match source.resolve() {
            Some(file) => self.fields("record", &[("file", file)]),
            None => self,
        }
    }

    pub fn at(self, user_id: impl ToString) -> Self {
        self.fields("at", &[("qq", user_id.to_string())])
    }

    /// 引用回复
    pub fn reply(self, message_id: impl ToString) -> Self {
        self.fields("reply", &[("id", message_id.to_string())])
    }

    pub fn poke(self, user_id: impl ToString) -> Self {
        self.fields("poke", &[("qq", user_id.to_string())])
    }

    /// 链接分享，content 与 image_url 可省略
    pub fn share(
        self,
        url: impl Into<String>,
        title: impl Into<String>,
        content: Option<String>,
        image_url: Option<String>,
    ) -> Self {
        let mut fields = vec![("url", url.into()), ("title", title.into())];
        fields.extend(content.map(|c| ("content", c)));
        fields.extend(image_url.map(|i| ("image", i)));
        self.fields("share", &fields)
    }

    /// 推荐好友名片
    pub fn contact_user(self, user_id: impl ToString) -> Self {
        self.fields("contact", &[("type", "qq".to_string()), ("id", user_id.to_string())])
    }

    /// platform 为 "qq"、"163" 等
    pub fn music(self, platform: impl Into<String>, id: impl ToString) -> Self {
        self.fields("music", &[("type", platform.into()), ("id", id.to_string())])
    }

    /// 自定义转发节点
    pub fn node_custom(
        self,
        user_id: impl ToString,
        nickname: impl Into<String>,
        content: Message,
    ) -> Self {
        let mut data = Object::new();
        data.insert("name".into(), Value::from(nickname.into()));
        data.insert("uin".into(), Value::from(user_id.to_string()));
        let content: Vec<Value> = content.0.iter().map(Segment::to_value).collect();
        data.insert("content".into(), Value::from(content));
        self.add("node", data)
    }
}

/// 生成自定义合并转发消息，name 为空时使用 "这里是{昵称}"
pub fn custom_forward_msg(
    msg_list: Vec<Message>,
    uin: impl ToString,
    name: Option<&str>,
    nickname: &str,
) -> Message {
    let name = name
        .map(String::from)
        .unwrap_or_else(|| format!("这里是{}", nickname));
    let uin = uin.to_string();
    msg_list
        .into_iter()
        .fold(Message::new(), |acc, msg| acc.node_custom(&uin, name.clone(), msg))
}

// 允许直接从字符串字面量转换为纯文本消息
impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::new().text(s)
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::new().text(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn base64_prefix_added_once() {
        assert_eq!(
            ImageSource::Base64("abc".into()).resolve().as_deref(),
            Some("base64://abc")
        );
        assert_eq!(
            ImageSource::Base64("base64://abc".into()).resolve().as_deref(),
            Some("base64://abc")
        );
        assert_eq!(
            ImageSource::from("https://a/b.png").resolve().as_deref(),
            Some("https://a/b.png")
        );
    }

    #[test]
    fn missing_image_is_skipped() {
        let msg = Message::new()
            .text("hi")
            .image(ImageSource::Named("definitely/missing.png".into()))
            .image(PathBuf::from("/no/such/file.png"));
        assert_eq!(msg.segments().len(), 1);
    }

    #[test]
    fn existing_path_is_encoded() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"png").unwrap();
        let msg = Message::new().image(file.path().to_path_buf());
        let seg = &msg.segments()[0];
        assert_eq!(seg.type_, "image");
        assert_eq!(seg.get_str("file"), Some("base64://cG5n"));
    }

    #[test]
    fn record_url_passes_through() {
        let msg = Message::new().record(RecordSource::Named("http://a/b.mp3".into()));
        assert_eq!(msg.segments()[0].get_str("file"), Some("http://a/b.mp3"));
        let msg = Message::new().record(RecordSource::Path("/no/such.mp3".into()));
        assert!(msg.is_empty());
    }

    #[test]
    fn forward_nodes_use_default_name() {
        let msg = custom_forward_msg(vec!["a".into(), "b".into()], 10086, None, "真寻");
        assert_eq!(msg.segments().len(), 2);
        let node = &msg.segments()[0];
        assert_eq!(node.type_, "node");
        assert_eq!(node.get_str("name"), Some("这里是真寻"));
        assert_eq!(node.get_str("uin"), Some("10086"));
    }

    #[test]
    fn card_segments_carry_fields() {
        let msg = Message::new()
            .reply(55)
            .face(14)
            .share("https://a", "标题", None, Some("https://a/i.png".into()))
            .music("163", 1)
            .contact_user(42)
            .json("{}")
            .xml("<a/>");
        let types: Vec<&str> = msg.segments().iter().map(|s| s.type_.as_str()).collect();
        assert_eq!(types, ["reply", "face", "share", "music", "contact", "json", "xml"]);
        let share = &msg.segments()[2];
        assert_eq!(share.get_str("image"), Some("https://a/i.png"));
        assert_eq!(share.get_str("content"), None);
        assert_eq!(msg.segments()[3].get_str("type"), Some("163"));
        assert_eq!(msg.segments()[4].get_str("type"), Some("qq"));
    }

    #[test]
    fn plain_text_joins_text_segments() {
        let msg = Message::new().text("a").at(1).text("b");
        assert_eq!(msg.plain_text(), "ab");
    }
}
